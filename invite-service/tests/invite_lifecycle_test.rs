//! Invite lifecycle integration tests.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use common::{harness, harness_with, HarnessOptions};
use invite_service::models::{AuditAction, Invite, InviteRole, InviteState};
use invite_service::services::{InviteClaims, InviteStore, ServiceError};

const ADMIN_ID: Uuid = Uuid::from_u128(1);
const NEW_USER_ID: Uuid = Uuid::from_u128(2);
const CLIENT_IP: &str = "203.0.113.9";

#[tokio::test]
async fn create_persists_and_sends_email() {
    let h = harness();

    let invite = h
        .service
        .create("new.student@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .expect("create should succeed");

    assert_eq!(invite.state(), InviteState::Pending);
    assert_eq!(invite.email, "new.student@example.com");
    assert_eq!(h.email.sent_count(), 1);

    let stored = h.store.get(invite.invite_id).await.unwrap();
    assert!(stored.is_some());
    assert_eq!(h.audit.actions(), vec![AuditAction::InviteCreated]);
}

#[tokio::test]
async fn email_failure_rolls_back_creation() {
    let h = harness();
    h.email.set_failing(true);

    let result = h
        .service
        .create("student@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await;

    assert!(matches!(result, Err(ServiceError::Email(_))));
    assert_eq!(h.email.sent_count(), 0);
    let rows = h.store.list_by_email("student@example.com").await.unwrap();
    assert!(rows.is_empty(), "aborted create must not leave a row behind");
    assert_eq!(h.audit.actions(), vec![AuditAction::InviteRefused]);
}

#[tokio::test]
async fn rate_limited_create_leaves_a_refusal_in_the_audit_trail() {
    let h = harness_with(HarnessOptions {
        ip_limit: 1,
        ..HarnessOptions::default()
    });

    h.service
        .create("first@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    let limited = h
        .service
        .create("second@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await;
    assert!(matches!(limited, Err(ServiceError::RateLimited(_))));

    assert_eq!(
        h.audit.actions(),
        vec![AuditAction::InviteCreated, AuditAction::InviteRefused]
    );
}

#[tokio::test]
async fn full_signup_flow_for_a_teacher() {
    let h = harness();

    let invite = h
        .service
        .create("teacher@school.edu", InviteRole::Teacher, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    // The emailed token is the one the recipient will present
    let token = {
        let sent = h.email.sent.lock().unwrap();
        sent[0].1.clone()
    };

    let preview = h.service.validate_token(&token).await.unwrap();
    assert_eq!(preview.invite_id, invite.invite_id);
    assert_eq!(preview.role, InviteRole::Teacher);

    // A tampered role claim must not change the outcome
    let mut wrong_role = h.tokens.decode(&token).unwrap();
    wrong_role.role = InviteRole::Student;
    let refused = h.service.accept(wrong_role, NEW_USER_ID).await;
    assert!(matches!(refused, Err(ServiceError::RoleMismatch)));

    let accepted = h.service.accept_with_token(&token, NEW_USER_ID).await.unwrap();
    assert_eq!(accepted.state(), InviteState::Accepted);
    assert_eq!(accepted.accepted_by_user_id, Some(NEW_USER_ID));
    assert!(accepted.accepted_utc.is_some());

    // Acceptance is terminal
    let again = h.service.accept_with_token(&token, NEW_USER_ID).await;
    assert!(matches!(again, Err(ServiceError::AlreadyUsed)));

    // The refused tampered accept shows up between creation and acceptance
    let actions = h.audit.actions();
    assert_eq!(
        actions,
        vec![
            AuditAction::InviteCreated,
            AuditAction::InviteRefused,
            AuditAction::InviteAccepted,
        ]
    );
}

#[tokio::test]
async fn raced_accepts_have_a_single_winner() {
    let h = harness();

    let invite = h
        .service
        .create("raced@school.edu", InviteRole::Teacher, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    let token = {
        let sent = h.email.sent.lock().unwrap();
        sent[0].1.clone()
    };
    let claims = h.tokens.decode(&token).unwrap();

    let svc_a = h.service.clone();
    let svc_b = h.service.clone();
    let claims_b = claims.clone();
    let a = tokio::spawn(async move { svc_a.accept(claims, Uuid::from_u128(10)).await });
    let b = tokio::spawn(async move { svc_b.accept(claims_b, Uuid::from_u128(11)).await });

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one accept must win: {:?}", results);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ServiceError::AlreadyUsed))));

    let stored = h.store.get(invite.invite_id).await.unwrap().unwrap();
    assert_eq!(stored.state(), InviteState::Accepted);
}

#[tokio::test]
async fn stored_expiry_beats_a_fresh_token_and_cache() {
    let h = harness();

    let mut invite = Invite::new(
        "late@school.edu".to_string(),
        InviteRole::Teacher,
        ADMIN_ID,
        7,
    );
    invite.expiry_utc = Utc::now() - ChronoDuration::hours(1);

    let mut tx = h.store.begin().await.unwrap();
    tx.insert(&invite).await.unwrap();
    tx.commit().await.unwrap();

    // Warm the cache with the (already overdue) pending row
    let cached = h.service.get(invite.invite_id).await.unwrap();
    assert!(cached.is_some());

    // Token whose own exp is still in the future
    let claims = InviteClaims {
        sub: invite.invite_id,
        email: invite.email.clone(),
        role: InviteRole::Teacher,
        exp: (Utc::now() + ChronoDuration::days(1)).timestamp(),
        iat: Utc::now().timestamp(),
    };

    let result = h.service.accept(claims, NEW_USER_ID).await;
    assert!(matches!(result, Err(ServiceError::InviteExpired)));

    let stored = h.store.get(invite.invite_id).await.unwrap().unwrap();
    assert_eq!(stored.state(), InviteState::Pending, "refusal must not mutate");
}

#[tokio::test]
async fn privileged_roles_are_domain_gated() {
    let h = harness();

    let refused = h
        .service
        .create("teacher@gmail.com", InviteRole::Teacher, ADMIN_ID, CLIENT_IP)
        .await;
    assert!(matches!(
        refused,
        Err(ServiceError::DomainNotAllowed { .. })
    ));
    assert!(h.store.list_by_email("teacher@gmail.com").await.unwrap().is_empty());
    assert_eq!(h.audit.actions(), vec![AuditAction::InviteRefused]);

    // Students may come from anywhere
    let ok = h
        .service
        .create("student@gmail.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn repeated_creates_saturate_the_spam_guard() {
    let h = harness();
    let email = "popular@example.com";

    for _ in 0..3 {
        h.service
            .create(email, InviteRole::Student, ADMIN_ID, CLIENT_IP)
            .await
            .expect("first three attempts pass");
    }

    let fourth = h
        .service
        .create(email, InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await;
    assert!(matches!(fourth, Err(ServiceError::SpamDetected)));

    // The guard saturates; later attempts stay refused
    let fifth = h
        .service
        .create(email, InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await;
    assert!(matches!(fifth, Err(ServiceError::SpamDetected)));
    assert_eq!(h.email.sent_count(), 3);
}

#[tokio::test]
async fn ip_rate_limit_fails_closed() {
    let h = harness_with(HarnessOptions {
        ip_limit: 2,
        ..HarnessOptions::default()
    });

    for i in 0..2 {
        let email = format!("user{}@example.com", i);
        h.service
            .create(&email, InviteRole::Student, ADMIN_ID, CLIENT_IP)
            .await
            .unwrap();
    }

    let third = h
        .service
        .create("user9@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await;
    assert!(matches!(third, Err(ServiceError::RateLimited(_))));

    // Another address is unaffected
    let other = h
        .service
        .create("user9@example.com", InviteRole::Student, ADMIN_ID, "198.51.100.7")
        .await;
    assert!(other.is_ok());
}

#[tokio::test]
async fn resend_extends_the_newest_pending_invite() {
    let h = harness();

    let created = h
        .service
        .create("slow.reader@school.edu", InviteRole::Teacher, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    let resent = h
        .service
        .resend("slow.reader@school.edu", ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    assert_eq!(resent.invite_id, created.invite_id);
    assert!(resent.expiry_utc > created.expiry_utc);
    assert_eq!(h.email.sent_count(), 2);

    let missing = h.service.resend("nobody@school.edu", ADMIN_ID, CLIENT_IP).await;
    assert!(matches!(missing, Err(ServiceError::NoPendingInvite)));
}

#[tokio::test]
async fn resend_email_failure_rolls_back_the_extension() {
    let h = harness();

    let created = h
        .service
        .create("flaky.relay@school.edu", InviteRole::Teacher, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    h.email.set_failing(true);
    let result = h
        .service
        .resend("flaky.relay@school.edu", ADMIN_ID, CLIENT_IP)
        .await;
    assert!(matches!(result, Err(ServiceError::Email(_))));

    // The failed extension must not stick
    let stored = h.store.get(created.invite_id).await.unwrap().unwrap();
    assert_eq!(stored.expiry_utc, created.expiry_utc);
    assert_eq!(stored.state(), InviteState::Pending);
    assert_eq!(h.email.sent_count(), 1);
    assert_eq!(
        h.audit.actions(),
        vec![AuditAction::InviteCreated, AuditAction::InviteRefused]
    );
}

#[tokio::test]
async fn cancel_is_terminal() {
    let h = harness();

    let invite = h
        .service
        .create("leaver@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    let cancelled = h.service.cancel(invite.invite_id, ADMIN_ID).await.unwrap();
    assert_eq!(cancelled.state(), InviteState::Expired);

    let again = h.service.cancel(invite.invite_id, ADMIN_ID).await;
    assert!(matches!(again, Err(ServiceError::AlreadyProcessed)));

    let unknown = h.service.cancel(Uuid::from_u128(99), ADMIN_ID).await;
    assert!(matches!(unknown, Err(ServiceError::InviteNotFound)));
}

#[tokio::test]
async fn cleanup_expires_overdue_invites_once() {
    let h = harness();

    for i in 0..2 {
        let mut invite = Invite::new(
            format!("overdue{}@example.com", i),
            InviteRole::Student,
            ADMIN_ID,
            7,
        );
        invite.expiry_utc = Utc::now() - ChronoDuration::days(1);
        let mut tx = h.store.begin().await.unwrap();
        tx.insert(&invite).await.unwrap();
        tx.commit().await.unwrap();
    }
    let fresh = h
        .service
        .create("fresh@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    assert_eq!(h.service.cleanup_expired().await.unwrap(), 2);
    // Idempotent: nothing left to expire
    assert_eq!(h.service.cleanup_expired().await.unwrap(), 0);

    let fresh_row = h.store.get(fresh.invite_id).await.unwrap().unwrap();
    assert_eq!(fresh_row.state(), InviteState::Pending);
    let overdue = h.store.list_by_email("overdue0@example.com").await.unwrap();
    assert_eq!(overdue[0].state(), InviteState::Expired);
}

#[tokio::test]
async fn validation_rejects_accepted_and_unknown_invites() {
    let h = harness();

    let _ = h
        .service
        .create("done@example.com", InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();
    let token = {
        let sent = h.email.sent.lock().unwrap();
        sent[0].1.clone()
    };

    h.service.accept_with_token(&token, NEW_USER_ID).await.unwrap();
    let after_accept = h.service.validate_token(&token).await;
    assert!(matches!(after_accept, Err(ServiceError::AlreadyAccepted)));

    // Token for an invite that no longer exists
    let orphan = Invite::new("ghost@example.com".to_string(), InviteRole::Student, ADMIN_ID, 7);
    let ghost_token = h.tokens.encode(&orphan).unwrap();
    let missing = h.service.validate_token(&ghost_token).await;
    assert!(matches!(missing, Err(ServiceError::InviteNotFound)));

    let garbage = h.service.validate_token("not-a-token").await;
    assert!(matches!(garbage, Err(ServiceError::InvalidToken)));
}

#[tokio::test]
async fn create_does_not_supersede_existing_pending_invites() {
    let h = harness();
    let email = "twice@example.com";

    let first = h
        .service
        .create(email, InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();
    let second = h
        .service
        .create(email, InviteRole::Student, ADMIN_ID, CLIENT_IP)
        .await
        .unwrap();

    assert_ne!(first.invite_id, second.invite_id);
    let rows = h.store.list_by_email(email).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|i| i.state() == InviteState::Pending));
    // Newest first, so a resend would pick the second invite
    assert_eq!(rows[0].invite_id, second.invite_id);
}
