use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// A community as the viewer's chat platform reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityRef {
    pub id: String,
    pub name: String,
}

/// Decides which communities a viewer may look at.
pub struct AccessGate;

impl AccessGate {
    /// The viewer's communities that the bot also knows about, in the
    /// viewer's order.
    pub fn visible_communities(
        viewer_communities: &[CommunityRef],
        known_ids: &HashSet<String>,
    ) -> Vec<CommunityRef> {
        viewer_communities
            .iter()
            .filter(|c| known_ids.contains(&c.id))
            .cloned()
            .collect()
    }

    pub fn validate_selection(visible: &[CommunityRef], selected_id: &str) -> AppResult<()> {
        if visible.iter().any(|c| c.id == selected_id) {
            Ok(())
        } else {
            Err(AppError::NotAllowed)
        }
    }

    pub fn default_selection(visible: &[CommunityRef]) -> Option<&CommunityRef> {
        visible.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community(id: &str) -> CommunityRef {
        CommunityRef {
            id: id.to_string(),
            name: format!("guild {}", id),
        }
    }

    fn known(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn viewer_sees_only_shared_communities() {
        let visible =
            AccessGate::visible_communities(&[community("1"), community("2")], &known(&["2", "3"]));

        assert_eq!(visible, vec![community("2")]);
        assert!(AccessGate::validate_selection(&visible, "2").is_ok());
        assert!(matches!(
            AccessGate::validate_selection(&visible, "3"),
            Err(AppError::NotAllowed)
        ));
        assert!(matches!(
            AccessGate::validate_selection(&visible, "1"),
            Err(AppError::NotAllowed)
        ));
    }

    #[test]
    fn viewer_order_is_preserved() {
        let visible = AccessGate::visible_communities(
            &[community("9"), community("4"), community("7")],
            &known(&["4", "7", "9"]),
        );
        let ids: Vec<_> = visible.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "4", "7"]);
        assert_eq!(AccessGate::default_selection(&visible), Some(&community("9")));
    }

    #[test]
    fn no_shared_communities_means_no_default() {
        let visible = AccessGate::visible_communities(&[community("1")], &known(&[]));
        assert!(visible.is_empty());
        assert_eq!(AccessGate::default_selection(&visible), None);
    }
}
