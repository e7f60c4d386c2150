//! Portal login against Exact CRM contacts
//!
//! A user is a contact whose email matches and whose configured secret field
//! equals the submitted password. Successful logins get a session token.

use std::sync::Arc;

use exact_client::ExactClient;
use tracing::{info, instrument, warn};

use crate::error::PortalError;
use crate::session::SessionKeys;

pub struct LoginVerifier {
    client: ExactClient,
    sessions: Arc<SessionKeys>,
    secret_field: String,
}

impl LoginVerifier {
    pub fn new(client: ExactClient, sessions: Arc<SessionKeys>, secret_field: String) -> Self {
        Self {
            client,
            sessions,
            secret_field,
        }
    }

    /// Verify credentials and issue a session token.
    ///
    /// Unknown email and wrong password fail identically with
    /// `InvalidCredentials`. Empty inputs fail the same way without an
    /// upstream call.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<String, PortalError> {
        let result = self.verify(email, password).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(PortalError::InvalidCredentials) => "invalid",
            Err(_) => "error",
        };
        metrics::counter!("portal_logins_total", "outcome" => outcome).increment(1);
        result
    }

    async fn verify(&self, email: &str, password: &str) -> Result<String, PortalError> {
        if email.is_empty() || password.is_empty() {
            return Err(PortalError::InvalidCredentials);
        }

        let contacts = self
            .client
            .find_contacts(email, &self.secret_field)
            .await
            .inspect_err(|e| warn!(error = %e, "contact lookup failed"))?;

        let Some(contact) = contacts.into_iter().next() else {
            info!("no login-enabled contact for email");
            return Err(PortalError::InvalidCredentials);
        };

        if contact.secret.as_deref() != Some(password) {
            info!("password mismatch");
            return Err(PortalError::InvalidCredentials);
        }

        let token = self.sessions.issue(
            &contact.id,
            contact.email.as_deref(),
            contact.full_name.as_deref(),
        )?;
        info!(contact_id = %contact.id, "login successful");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Route, exact_client, start_mock_exact};
    use axum::http::StatusCode;
    use exact_client::TokenError;
    use serde_json::json;
    use std::time::Duration;

    fn contacts_body() -> serde_json::Value {
        json!({ "d": { "results": [{
            "ID": "6f0a7c52-1111-2222-3333-444455556666",
            "Email": "jan@example.nl",
            "FullName": "Jan Jansen",
            "SocialSecurityNumber": "s3cret"
        }]}})
    }

    fn keys() -> Arc<SessionKeys> {
        Arc::new(SessionKeys::new(b"login-test", Duration::from_secs(3600)))
    }

    async fn verifier_with(routes: Vec<Route>) -> (LoginVerifier, crate::test_support::Hits) {
        let (base, hits) = start_mock_exact(routes).await;
        let verifier = LoginVerifier::new(
            exact_client(&base, Ok("at_test".into())),
            keys(),
            "SocialSecurityNumber".into(),
        );
        (verifier, hits)
    }

    #[tokio::test]
    async fn matching_secret_issues_token_with_contact_identity() {
        let (verifier, hits) =
            verifier_with(vec![Route::ok("crm/Contacts", contacts_body())]).await;

        let token = verifier.login("jan@example.nl", "s3cret").await.unwrap();
        let claims = keys().verify(&token).unwrap();
        assert_eq!(claims.id, "6f0a7c52-1111-2222-3333-444455556666");
        assert_eq!(claims.email.as_deref(), Some("jan@example.nl"));
        assert_eq!(claims.name.as_deref(), Some("Jan Jansen"));

        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "/api/v1/3555770/crm/Contacts");
        assert_eq!(
            hits[0].1["$filter"],
            "Email eq 'jan@example.nl' and SocialSecurityNumber ne null"
        );
        assert_eq!(hits[0].1["$select"], "ID,SocialSecurityNumber,Email,FullName");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_fail_identically() {
        let (verifier, _) = verifier_with(vec![Route::ok("crm/Contacts", contacts_body())]).await;
        let wrong = verifier.login("jan@example.nl", "guess").await.unwrap_err();

        let (verifier, _) =
            verifier_with(vec![Route::ok("crm/Contacts", json!({ "d": { "results": [] } }))]).await;
        let unknown = verifier.login("nobody@example.nl", "s3cret").await.unwrap_err();

        assert!(matches!(wrong, PortalError::InvalidCredentials));
        assert!(matches!(unknown, PortalError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn empty_inputs_skip_upstream() {
        let (verifier, hits) =
            verifier_with(vec![Route::ok("crm/Contacts", contacts_body())]).await;
        assert!(matches!(
            verifier.login("", "s3cret").await,
            Err(PortalError::InvalidCredentials)
        ));
        assert!(matches!(
            verifier.login("jan@example.nl", "").await,
            Err(PortalError::InvalidCredentials)
        ));
        assert!(hits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quote_in_email_is_escaped() {
        let (verifier, hits) =
            verifier_with(vec![Route::ok("crm/Contacts", json!({ "d": { "results": [] } }))]).await;
        let _ = verifier.login("o'brien@example.ie", "pw").await;
        let hits = hits.lock().unwrap();
        assert!(
            hits[0].1["$filter"].starts_with("Email eq 'o''brien@example.ie'"),
            "got: {}",
            hits[0].1["$filter"]
        );
    }

    #[tokio::test]
    async fn upstream_error_is_not_invalid_credentials() {
        let (verifier, _) = verifier_with(vec![Route {
            suffix: "crm/Contacts",
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "error": "boom" }),
        }])
        .await;
        assert!(matches!(
            verifier.login("jan@example.nl", "s3cret").await,
            Err(PortalError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_upstream_token_is_reported() {
        let (base, hits) = start_mock_exact(vec![Route::ok("crm/Contacts", contacts_body())]).await;
        let verifier = LoginVerifier::new(
            exact_client(&base, Err(TokenError::Unavailable)),
            keys(),
            "SocialSecurityNumber".into(),
        );
        assert!(matches!(
            verifier.login("jan@example.nl", "s3cret").await,
            Err(PortalError::NoTokenAvailable)
        ));
        assert!(hits.lock().unwrap().is_empty());
    }
}
