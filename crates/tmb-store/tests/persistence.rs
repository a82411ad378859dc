//! JsonStore durability: reopen, failed-write rollback, corrupt files, and
//! several handles (processes) sharing one database file.

use chrono::{NaiveDate, Utc};
use tmb_core::types::{Consent, Infant, User, Video};
use tmb_core::Sha256Hex;
use tmb_store::{EntityStore, JsonStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

fn seed(store: &JsonStore) -> (User, Infant) {
    let user = store
        .create_user(User {
            user_id: Uuid::new_v4(),
            email: "nurse@example.org".into(),
            access_key_hash: "f".repeat(64),
            disabled: false,
            created_at: Utc::now(),
        })
        .unwrap();
    let infant = store
        .create_infant(Infant {
            infant_id: Uuid::new_v4(),
            full_name: "Baby Example".into(),
            birth_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            nhi_number: "ZZZ0001".into(),
            created_by: user.user_id,
            created_at: Utc::now(),
        })
        .unwrap();
    (user, infant)
}

#[test]
fn records_survive_reopen() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("db").join("tinymotion.json");

    let (user, infant, video_id) = {
        let store = JsonStore::open(&path).unwrap();
        let (user, infant) = seed(&store);
        store
            .create_consent(Consent {
                consent_id: Uuid::new_v4(),
                infant_id: infant.infant_id,
                consent_giver_name: None,
                consent_giver_email: None,
                collected_physically: true,
                created_by: user.user_id,
                created_at: Utc::now(),
            })
            .unwrap();
        let video = store
            .create_video(Video {
                video_id: Uuid::new_v4(),
                infant_id: infant.infant_id,
                sha256sum: Sha256Hex::parse(&"c".repeat(64)).unwrap(),
                video_name: "clip.mp4.enc".into(),
                created_by: user.user_id,
                created_at: Utc::now(),
                size_bytes: None,
                sha256sum_enc: None,
            })
            .unwrap();
        store
            .finalize_video(video.video_id, 1024, "d".repeat(64))
            .unwrap();
        (user, infant, video.video_id)
    };

    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());

    let reopened = JsonStore::open(&path).unwrap();
    assert_eq!(reopened.get_user(user.user_id).unwrap(), user);
    assert_eq!(reopened.get_infant(infant.infant_id).unwrap(), infant);
    assert_eq!(reopened.consents_for_infant(infant.infant_id).unwrap().len(), 1);

    let video = reopened.get_video(video_id).unwrap();
    assert!(video.is_finalized());
    assert_eq!(video.size_bytes, Some(1024));
}

#[test]
fn rejected_write_is_not_persisted() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("tinymotion.json");

    {
        let store = JsonStore::open(&path).unwrap();
        let (user, infant) = seed(&store);
        let mut dup = infant.clone();
        dup.infant_id = Uuid::new_v4();
        dup.created_by = user.user_id;
        assert!(matches!(
            store.create_infant(dup),
            Err(StoreError::UniqueConstraint { .. })
        ));
    }

    let reopened = JsonStore::open(&path).unwrap();
    assert_eq!(reopened.list_infants().unwrap().len(), 1);
}

#[test]
fn missing_file_opens_empty() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("absent.json");

    let store = JsonStore::open(&path).unwrap();
    assert!(store.list_users().unwrap().is_empty());
    // Nothing written until the first mutation
    assert!(!path.exists());
}

#[test]
fn corrupt_file_is_a_load_error() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("tinymotion.json");
    std::fs::write(&path, b"{ not json").unwrap();

    assert!(matches!(
        JsonStore::open(&path),
        Err(StoreError::Load { .. })
    ));
}

#[test]
fn cascade_is_persisted() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("tinymotion.json");

    let infant_id = {
        let store = JsonStore::open(&path).unwrap();
        let (_, infant) = seed(&store);
        store.delete_infant_cascade(infant.infant_id).unwrap();
        infant.infant_id
    };

    let reopened = JsonStore::open(&path).unwrap();
    assert!(reopened.get_infant(infant_id).is_err());
    assert!(reopened.find_infant_by_nhi("ZZZ0001").unwrap().is_none());
}

fn staff(key_hash: String) -> User {
    User {
        user_id: Uuid::new_v4(),
        email: "staff@example.org".into(),
        access_key_hash: key_hash,
        disabled: false,
        created_at: Utc::now(),
    }
}

#[test]
fn handles_on_one_file_see_each_others_writes() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("tinymotion.json");

    // e.g. the daemon and a `tmb` invocation
    let daemon = JsonStore::open(&path).unwrap();
    let cli = JsonStore::open(&path).unwrap();

    let a = cli.create_user(staff("a".repeat(64))).unwrap();
    assert_eq!(daemon.get_user(a.user_id).unwrap(), a);

    let b = daemon.create_user(staff("b".repeat(64))).unwrap();
    assert_eq!(cli.list_users().unwrap().len(), 2);

    // A unique key taken through one handle is enforced through the other
    assert!(matches!(
        daemon.create_user(staff("a".repeat(64))),
        Err(StoreError::UniqueConstraint { .. })
    ));

    let on_disk = JsonStore::open(&path).unwrap();
    let ids: Vec<Uuid> = on_disk.list_users().unwrap().iter().map(|u| u.user_id).collect();
    assert!(ids.contains(&a.user_id));
    assert!(ids.contains(&b.user_id));
    assert!(path.with_extension("lock").exists());
}

#[test]
fn concurrent_handles_do_not_lose_writes() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = Arc::new(tmp.path().join("tinymotion.json"));

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let path = Arc::clone(&path);
            std::thread::spawn(move || {
                let store = JsonStore::open(&path).unwrap();
                for i in 0..10 {
                    store
                        .create_user(staff(format!("{w:02}{i:062}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let store = JsonStore::open(&path).unwrap();
    assert_eq!(store.list_users().unwrap().len(), 40);
}
