mod support;

use std::sync::Arc;

use exam_core::envelope::AttemptStatus;
use exam_core::model::{AttemptId, EvaluationType};
use exam_core::Clock;
use exam_core::time::{fixed_clock, fixed_now};
use exam_core::{AttemptSession, SessionConfig};
use serde_json::json;
use services::{AttemptError, AttemptTarget, ChannelNotifier, Notice, SyncService};
use storage::repository::{AnnouncementRepository, InMemoryRepository};
use support::{RecordingApi, quiz};

fn session() -> AttemptSession {
    AttemptSession::new(
        AttemptId::new("t1"),
        quiz(600, EvaluationType::Auto),
        SessionConfig::default(),
    )
}

fn target(session: &AttemptSession) -> AttemptTarget {
    AttemptTarget::new(
        session.attempt_id().clone(),
        session.assessment().id().clone(),
    )
}

#[tokio::test]
async fn sync_stores_announcements() {
    let repo = InMemoryRepository::new();
    let api = Arc::new(RecordingApi {
        announcements: Some(json!([{"text": "Ten minutes left"}, {"text": "Hydrate"}])),
        ..RecordingApi::default()
    });
    let (notifier, mut notices) = ChannelNotifier::channel();
    let service = SyncService::new(
        api.clone(),
        Arc::new(repo.clone()),
        Arc::new(notifier),
        fixed_clock(),
    );
    let session = session();

    let stored = service
        .sync(&target(&session), &session.envelope(AttemptStatus::Live, 1))
        .await
        .unwrap();

    assert_eq!(stored, 2);
    assert_eq!(api.sync_count(), 1);
    let listed = repo.list_announcements(session.attempt_id()).await.unwrap();
    assert_eq!(listed[0].payload, json!({"text": "Ten minutes left"}));
    assert_eq!(notices.try_recv().unwrap(), Notice::Announcements { count: 2 });
}

#[tokio::test]
async fn failed_sync_notifies_and_keeps_going() {
    let repo = InMemoryRepository::new();
    let api = Arc::new(RecordingApi {
        fail_syncs: true,
        ..RecordingApi::default()
    });
    let (notifier, mut notices) = ChannelNotifier::channel();
    let service = SyncService::new(
        api.clone(),
        Arc::new(repo.clone()),
        Arc::new(notifier),
        fixed_clock(),
    );
    let session = session();
    let envelope = session.envelope(AttemptStatus::Live, 1);

    let err = service.sync(&target(&session), &envelope).await.unwrap_err();
    assert!(matches!(err, AttemptError::Api(_)));
    assert_eq!(notices.try_recv().unwrap(), Notice::SyncFailed);

    // A later sync resends the whole state.
    let _ = service.sync(&target(&session), &envelope).await;
    assert_eq!(api.sync_count(), 2);
    assert!(
        repo.list_announcements(session.attempt_id())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn repeated_syncs_keep_one_copy_of_each_announcement() {
    let repo = InMemoryRepository::new();
    let (notifier, mut notices) = ChannelNotifier::channel();
    let notifier = Arc::new(notifier);
    let first = SyncService::new(
        Arc::new(RecordingApi {
            announcements: Some(json!([{"text": "Ten minutes left"}])),
            ..RecordingApi::default()
        }),
        Arc::new(repo.clone()),
        notifier.clone(),
        fixed_clock(),
    );
    let session = session();
    let envelope = session.envelope(AttemptStatus::Live, 1);

    assert_eq!(first.sync(&target(&session), &envelope).await.unwrap(), 1);
    for _ in 0..2 {
        assert_eq!(first.sync(&target(&session), &envelope).await.unwrap(), 0);
    }
    let listed = repo.list_announcements(session.attempt_id()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(notices.try_recv().unwrap(), Notice::Announcements { count: 1 });
    assert!(notices.try_recv().is_err());

    let later = fixed_now() + chrono::Duration::minutes(1);
    let second = SyncService::new(
        Arc::new(RecordingApi {
            announcements: Some(json!([{"text": "Ten minutes left"}, {"text": "Hydrate"}])),
            ..RecordingApi::default()
        }),
        Arc::new(repo.clone()),
        notifier,
        Clock::Fixed(later),
    );
    assert_eq!(second.sync(&target(&session), &envelope).await.unwrap(), 1);

    let listed = repo.list_announcements(session.attempt_id()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].received_at, fixed_now());
    assert_eq!(listed[1].payload, json!({"text": "Hydrate"}));
    assert_eq!(listed[1].received_at, later);
    assert_eq!(notices.try_recv().unwrap(), Notice::Announcements { count: 1 });
}
