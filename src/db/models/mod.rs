pub mod community;
pub mod platform_type;
pub mod stream_registration;

pub use self::community::*;
pub use self::platform_type::*;
pub use self::stream_registration::*;
