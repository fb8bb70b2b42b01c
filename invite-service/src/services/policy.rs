//! Email domain policy for invite roles.
//!
//! Privileged roles (teacher, admin) may only be invited at domains on the
//! configured allow-list. Students can sign up from any domain.

use super::ServiceError;
use crate::models::InviteRole;

#[derive(Debug, Clone)]
pub struct DomainPolicy {
    allowed_domains: Vec<String>,
}

impl DomainPolicy {
    pub fn new(allowed_domains: Vec<String>) -> Self {
        Self {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Lowercase and trim an address, rejecting anything without a local
    /// part, an `@`, or a domain.
    pub fn normalize_email(email: &str) -> Result<String, ServiceError> {
        let email = email.trim().to_lowercase();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
            _ => Err(ServiceError::InvalidEmailFormat),
        }
    }

    /// Check that `email` may be invited as `role`.
    pub fn validate(&self, email: &str, role: InviteRole) -> Result<(), ServiceError> {
        let normalized = Self::normalize_email(email)?;
        let domain = normalized
            .split_once('@')
            .map(|(_, d)| d)
            .ok_or(ServiceError::InvalidEmailFormat)?;

        if role.is_privileged() && !self.allowed_domains.iter().any(|d| d == domain) {
            return Err(ServiceError::DomainNotAllowed {
                domain: domain.to_string(),
                role: role.as_str().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DomainPolicy {
        DomainPolicy::new(vec!["school.edu".to_string(), "District.org ".to_string()])
    }

    #[test]
    fn privileged_roles_require_allowed_domain() {
        let policy = policy();
        assert!(matches!(
            policy.validate("x@gmail.com", InviteRole::Teacher),
            Err(ServiceError::DomainNotAllowed { .. })
        ));
        assert!(matches!(
            policy.validate("x@gmail.com", InviteRole::Admin),
            Err(ServiceError::DomainNotAllowed { .. })
        ));
        assert!(policy.validate("x@school.edu", InviteRole::Teacher).is_ok());
    }

    #[test]
    fn students_are_unrestricted() {
        assert!(policy().validate("x@gmail.com", InviteRole::Student).is_ok());
    }

    #[test]
    fn domain_matching_is_case_insensitive() {
        let policy = policy();
        assert!(policy
            .validate("Teacher@SCHOOL.EDU", InviteRole::Teacher)
            .is_ok());
        assert!(policy
            .validate("admin@district.org", InviteRole::Admin)
            .is_ok());
    }

    #[test]
    fn malformed_emails_fail_before_domain_matching() {
        let policy = policy();
        assert!(matches!(
            policy.validate("not-an-email", InviteRole::Student),
            Err(ServiceError::InvalidEmailFormat)
        ));
        assert!(matches!(
            policy.validate("@school.edu", InviteRole::Teacher),
            Err(ServiceError::InvalidEmailFormat)
        ));
        assert!(matches!(
            policy.validate("user@", InviteRole::Teacher),
            Err(ServiceError::InvalidEmailFormat)
        ));
    }
}
