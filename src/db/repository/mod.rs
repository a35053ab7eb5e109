pub mod community;
pub mod stream_registration;

pub use community::CommunityRepository;
pub use stream_registration::StreamRegistrationRepository;
