//! Authentication hook for validating a login.
//!
//! Ferry doesn't implement authentication itself. A node calls the
//! [`Authenticator`] you give it with the name and password from
//! LOGIN_REQUEST, and either admits the session or sends the rejection
//! reason back as LOGIN_FAILURE.

use crate::SessionError;

/// Validates a login's credentials.
///
/// # Trait bounds
///
/// - `Send + Sync`: one authenticator is shared by every connection task
///   of a node.
/// - `'static`: it lives as long as the node.
///
/// # Example
///
/// ```rust
/// use ferry_session::{Authenticator, SessionError};
///
/// /// Admits everyone except the user called "mallory".
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(
///         &self,
///         name: &str,
///         _password: &str,
///     ) -> Result<(), SessionError> {
///         if name == "mallory" {
///             return Err(SessionError::AuthFailed("banned".into()));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Checks `name` / `password`.
    ///
    /// # Returns
    /// - `Ok(())`: admitted; the node issues a reconnect key
    /// - `Err(SessionError::AuthFailed(reason))`: rejected with `reason`
    fn authenticate(
        &self,
        name: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}
