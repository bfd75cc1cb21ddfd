//! User-scoped channel naming.

use imgpipe_core::UserId;

const PREFIX: &str = "user:";
const SUFFIX: &str = ":events";

/// Pattern covering every user's event channel
pub const USER_EVENTS_PATTERN: &str = "user:*:events";

/// Channel carrying events for `user_id`
pub fn user_channel(user_id: &UserId) -> String {
    format!("{PREFIX}{user_id}{SUFFIX}")
}

/// Recover the user id embedded in a channel name produced by
/// [`user_channel`]. Returns `None` for foreign channels.
pub fn parse_user_channel(channel: &str) -> Option<UserId> {
    let id = channel.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if id.is_empty() {
        return None;
    }
    Some(UserId::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_channel_shape() {
        assert_eq!(user_channel(&UserId::new("42")), "user:42:events");
        assert_eq!(parse_user_channel("user:42:events"), Some(UserId::new("42")));
    }

    #[test]
    fn test_foreign_channels_rejected() {
        assert_eq!(parse_user_channel("user::events"), None);
        assert_eq!(parse_user_channel("images:42"), None);
        assert_eq!(parse_user_channel("user:42:other"), None);
    }

    proptest! {
        #[test]
        fn prop_channel_name_recovers_user(id in "[A-Za-z0-9:_-]{1,24}") {
            let user = UserId::new(id);
            prop_assert_eq!(parse_user_channel(&user_channel(&user)), Some(user));
        }
    }
}
