//! Basic-auth credentials shared by the uploader and the store.

/// Username and password for HTTP basic authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Credentials only when both parts are non-empty
    pub fn from_parts(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_parts_mean_no_credentials() {
        assert!(Credentials::from_parts("", "").is_none());
        assert!(Credentials::from_parts("user", "").is_none());
        assert!(Credentials::from_parts("", "pass").is_none());
        assert_eq!(
            Credentials::from_parts("user", "pass"),
            Some(Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            })
        );
    }
}
