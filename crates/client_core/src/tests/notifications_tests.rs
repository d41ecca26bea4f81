use super::*;
use chrono::{Duration, Utc};
use shared::domain::{QuestionId, QuizId};

fn unit(question: i64) -> UnitKey {
    UnitKey::new(QuizId(1), QuestionId(question))
}

fn comment(text: &str, line_number: Option<u32>, age_secs: i64) -> CommentPayload {
    CommentPayload {
        author: "teacher".into(),
        text: text.into(),
        line_number,
        created_at: Utc::now() - Duration::seconds(age_secs),
        is_teacher: true,
    }
}

#[test]
fn set_unread_replaces_instead_of_accumulating() {
    let mut store = NotificationStore::default();

    store.set_unread(4);
    store.set_unread(2);

    assert_eq!(store.unread(), 2);
}

#[test]
fn append_is_idempotent_per_identity() {
    let mut store = NotificationStore::default();
    let c = comment("check the loop bound", Some(3), 60);

    assert!(store.append(unit(1), c.clone()));
    assert!(!store.append(unit(1), c));

    assert_eq!(store.recent().len(), 1);
    assert_eq!(store.thread_history(ThreadKey::new(unit(1), 3)).len(), 1);
}

#[test]
fn summaries_are_most_recent_first_and_capped() {
    let mut store = NotificationStore::with_cap(2);

    store.append(unit(1), comment("first", None, 30));
    store.append(unit(1), comment("second", None, 20));
    store.append(unit(2), comment("third", None, 10));

    let recent = store.recent();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].comment.text, "third");
    assert_eq!(recent[1].comment.text, "second");
}

#[test]
fn thread_history_filters_by_unit_and_line() {
    let mut store = NotificationStore::default();

    store.append(unit(1), comment("on line three", Some(3), 40));
    store.append(unit(1), comment("on line five", Some(5), 30));
    store.append(unit(1), comment("general remark", None, 20));
    store.append(unit(2), comment("other question", Some(3), 10));

    let history = store.thread_history(ThreadKey::new(unit(1), 3));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "on line three");
}

#[test]
fn a_thread_is_open_or_absent_never_duplicated() {
    let mut store = NotificationStore::default();
    let key = ThreadKey::new(unit(1), 7);

    assert!(store.open_thread(key));
    assert!(!store.open_thread(key));
    assert!(store.is_thread_open(key));

    assert!(store.close_thread(key));
    assert!(!store.close_thread(key));
    assert!(!store.is_thread_open(key));
}

#[test]
fn badge_label_hides_zero_and_clamps_large_counts() {
    assert_eq!(badge_label(0), None);
    assert_eq!(badge_label(5), Some("5".into()));
    assert_eq!(badge_label(99), Some("99".into()));
    assert_eq!(badge_label(100), Some("99+".into()));
}
