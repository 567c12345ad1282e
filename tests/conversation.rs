mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use campus_portal::{
    backend::{Backend, SqliteStore},
    chat::{AutoResponder, CannedReplies, Contact, ConversationStore, NoReplies, SendOutcome, find_contact},
    db::{Message, NewMessage, Role},
    error::PortalError,
    session::SessionManager,
};
use uuid::Uuid;

use common::{PASSWORD, PATIENCE, RecordingBackend, register, wait_until};

struct Campus {
    store: Arc<SqliteStore>,
    student: Uuid,
    faculty: Uuid,
    other_faculty: Uuid,
}

impl Campus {
    async fn new() -> Self {
        let store = SqliteStore::in_memory().await.unwrap();
        let student = register(&store, "ravi@lendi.edu", "Ravi Kumar", Role::Student).await;
        let faculty = register(&store, "priya@lendi.edu", "Priya Sharma", Role::Faculty).await;
        let other_faculty = register(&store, "arjun@lendi.edu", "Arjun Rao", Role::Faculty).await;
        Campus { store, student, faculty, other_faculty }
    }

    async fn contact(&self, id: Uuid) -> Contact {
        let profile = self.store.client().fetch_profile(id).await.unwrap().unwrap();
        Contact::from(profile)
    }

    fn conversation(&self, me: Uuid, role: Role) -> ConversationStore {
        ConversationStore::new(Arc::new(self.store.client()), me, Some(role), Arc::new(NoReplies))
    }

    async fn write(&self, from: Uuid, to: Uuid, content: &str) -> Message {
        self.store
            .client()
            .insert_message(NewMessage { sender_id: from, receiver_id: to, content: content.to_owned() })
            .await
            .unwrap()
    }
}

async fn wait_for_messages(store: &ConversationStore, count: usize) -> Vec<Message> {
    tokio::time::timeout(PATIENCE, async {
        loop {
            let messages = store.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("messages never arrived")
}

#[derive(Default)]
struct CountingResponder(AtomicUsize);

impl AutoResponder for CountingResponder {
    fn respond(&self, _backend: Arc<dyn Backend>, _from: Uuid, _to: Uuid) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn blank_drafts_are_not_sent() {
    let campus = Campus::new().await;
    let backend = RecordingBackend::new(campus.store.client());
    let mut store = ConversationStore::new(backend.clone(), campus.student, Some(Role::Student), Arc::new(NoReplies));

    // nobody selected yet
    assert_eq!(store.send("hello").await.unwrap(), SendOutcome::Skipped);

    store.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();
    assert_eq!(store.send("").await.unwrap(), SendOutcome::Skipped);
    assert_eq!(store.send("   \n\t").await.unwrap(), SendOutcome::Skipped);

    assert!(!backend.called("insert_message"));
    assert!(store.messages().is_empty());
}

#[tokio::test]
async fn sent_messages_arrive_through_the_feed() {
    let campus = Campus::new().await;
    let mut ravi = campus.conversation(campus.student, Role::Student);
    let mut priya = campus.conversation(campus.faculty, Role::Faculty);

    ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();
    priya.select_counterpart(campus.contact(campus.student).await).await.unwrap();

    let SendOutcome::Sent(sent) = ravi.send("  When is the lab exam?  ").await.unwrap() else {
        panic!("message was skipped");
    };
    assert_eq!(sent.content, "When is the lab exam?");
    assert!(ravi.draft().is_empty());
    // no optimistic copy
    assert!(ravi.messages().is_empty());

    let received = wait_for_messages(&priya, 1).await;
    assert_eq!(received, [sent.clone()]);
    assert!(!received[0].is_read);

    let echoed = wait_for_messages(&ravi, 1).await;
    assert_eq!(echoed, [sent]);
}

#[tokio::test]
async fn appended_messages_are_announced() {
    let campus = Campus::new().await;
    let mut priya = campus.conversation(campus.faculty, Role::Faculty);
    priya.select_counterpart(campus.contact(campus.student).await).await.unwrap();
    let mut appended = priya.appended();

    let written = campus.write(campus.student, campus.faculty, "Good morning").await;

    let announced = tokio::time::timeout(PATIENCE, appended.recv()).await.unwrap().unwrap();
    assert_eq!(announced, written);
    assert!(priya.belongs(&announced));
}

#[tokio::test]
async fn switching_counterparts_drops_the_old_pair() {
    let campus = Campus::new().await;
    let mut ravi = campus.conversation(campus.student, Role::Student);

    ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();
    campus.write(campus.faculty, campus.student, "From Priya, before the switch").await;
    wait_for_messages(&ravi, 1).await;

    ravi.select_counterpart(campus.contact(campus.other_faculty).await).await.unwrap();
    assert!(ravi.messages().is_empty());

    let stale = campus.write(campus.faculty, campus.student, "From Priya, after the switch").await;
    let fresh = campus.write(campus.other_faculty, campus.student, "From Arjun").await;

    // the feed is ordered, so once Arjun's message is in, Priya's has been seen
    let messages = wait_for_messages(&ravi, 1).await;
    assert_eq!(messages, [fresh]);
    assert!(!ravi.belongs(&stale));
}

#[tokio::test]
async fn unrelated_pairs_are_ignored() {
    let campus = Campus::new().await;
    let mut arjun = campus.conversation(campus.other_faculty, Role::Faculty);
    arjun.select_counterpart(campus.contact(campus.student).await).await.unwrap();

    campus.write(campus.student, campus.faculty, "For Priya only").await;
    let mine = campus.write(campus.student, campus.other_faculty, "For Arjun").await;

    assert_eq!(wait_for_messages(&arjun, 1).await, [mine]);
}

#[tokio::test]
async fn insert_during_history_fetch_is_delivered_once() {
    let campus = Campus::new().await;
    let backend = RecordingBackend::new(campus.store.client());
    let mut priya = ConversationStore::new(backend.clone(), campus.faculty, Some(Role::Faculty), Arc::new(NoReplies));
    let mut appended = priya.appended();

    backend.insert_during_fetch(NewMessage {
        sender_id: campus.student,
        receiver_id: campus.faculty,
        content: "Sent while the history loads".to_owned(),
    });
    let history = priya.select_counterpart(campus.contact(campus.student).await).await.unwrap();

    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "Sent while the history loads");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(priya.messages(), history);
    assert!(appended.try_recv().is_err());

    // later inserts are announced again
    let later = campus.write(campus.student, campus.faculty, "And one after").await;
    let announced = tokio::time::timeout(PATIENCE, appended.recv()).await.unwrap().unwrap();
    assert_eq!(announced, later);
    assert_eq!(priya.messages().len(), 2);
}

#[tokio::test]
async fn history_covers_both_directions_in_order() {
    let campus = Campus::new().await;
    let first = campus.write(campus.student, campus.faculty, "Sir, is there class today?").await;
    campus.write(campus.student, campus.other_faculty, "Unrelated").await;
    let second = campus.write(campus.faculty, campus.student, "Yes, at 10.").await;
    let third = campus.write(campus.student, campus.faculty, "Thank you").await;

    let mut ravi = campus.conversation(campus.student, Role::Student);
    let history = ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();

    assert_eq!(history, [first, second, third]);
    assert_eq!(ravi.messages(), history);
}

#[tokio::test]
async fn failed_history_fetch_leaves_the_list_empty() {
    let campus = Campus::new().await;
    campus.write(campus.student, campus.faculty, "Hello").await;

    let backend = RecordingBackend::new(campus.store.client());
    backend.fail("fetch_conversation");
    let mut ravi = ConversationStore::new(backend.clone(), campus.student, Some(Role::Student), Arc::new(NoReplies));

    let err = ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap_err();
    assert!(matches!(err, PortalError::Fetch { what: "messages", .. }));
    assert!(ravi.messages().is_empty());

    backend.heal("fetch_conversation");
    assert_eq!(ravi.load_history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_send_keeps_the_draft() {
    let campus = Campus::new().await;
    let backend = RecordingBackend::new(campus.store.client());
    let mut ravi = ConversationStore::new(backend.clone(), campus.student, Some(Role::Student), Arc::new(NoReplies));
    ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();

    backend.fail("insert_message");
    let err = ravi.send("Please share the notes").await.unwrap_err();
    assert!(matches!(err, PortalError::Send(_)));
    assert_eq!(err.to_string(), "Failed to send message");
    assert_eq!(ravi.draft(), "Please share the notes");

    backend.heal("insert_message");
    assert!(matches!(ravi.send_draft().await.unwrap(), SendOutcome::Sent(_)));
    assert!(ravi.draft().is_empty());
}

#[tokio::test]
async fn students_get_a_canned_reply() {
    let campus = Campus::new().await;
    let responder = CannedReplies::with_replies(Duration::from_millis(20), vec!["Submit your assignment by Friday.".to_owned()]);
    let mut ravi = ConversationStore::new(
        Arc::new(campus.store.client()),
        campus.student,
        Some(Role::Student),
        Arc::new(responder),
    );
    ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();

    ravi.set_draft("When is the deadline?");
    ravi.send_draft().await.unwrap();

    let messages = wait_for_messages(&ravi, 2).await;
    assert_eq!(messages[0].sender_id, campus.student);
    assert_eq!(messages[1].sender_id, campus.faculty);
    assert_eq!(messages[1].receiver_id, campus.student);
    assert_eq!(messages[1].content, "Submit your assignment by Friday.");
}

#[tokio::test]
async fn faculty_messages_get_no_canned_reply() {
    let campus = Campus::new().await;
    let responder = Arc::new(CountingResponder::default());
    let mut priya = ConversationStore::new(
        Arc::new(campus.store.client()),
        campus.faculty,
        Some(Role::Faculty),
        responder.clone(),
    );
    priya.select_counterpart(campus.contact(campus.student).await).await.unwrap();
    priya.send("See me after class").await.unwrap();

    assert_eq!(responder.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closing_stops_delivery() {
    let campus = Campus::new().await;
    let mut ravi = campus.conversation(campus.student, Role::Student);
    ravi.select_counterpart(campus.contact(campus.faculty).await).await.unwrap();

    ravi.close();
    assert!(ravi.counterpart().is_none());

    campus.write(campus.faculty, campus.student, "Anyone there?").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ravi.messages().is_empty());
}

#[tokio::test]
async fn store_follows_the_signed_in_user() {
    let campus = Campus::new().await;
    let manager = SessionManager::new(Arc::new(campus.store.client()), "http://localhost:8080/");
    manager.initialize().await;

    let anonymous = ConversationStore::for_session(&manager, Arc::new(NoReplies));
    assert!(matches!(anonymous, Err(PortalError::NotAuthenticated)));

    manager.login("ravi@lendi.edu", PASSWORD).await.unwrap();
    wait_until(&manager, |state| state.role.is_some()).await;

    let store = ConversationStore::for_session(&manager, Arc::new(NoReplies)).unwrap();
    assert_eq!(store.me(), campus.student);

    let faculty = find_contact(store.backend().as_ref(), Some(Role::Student), campus.faculty)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(faculty.name, "Priya Sharma");
    assert_eq!(faculty.initials(), "PS");

    // students never see other students as contacts
    assert!(
        find_contact(store.backend().as_ref(), Some(Role::Student), campus.student)
            .await
            .unwrap()
            .is_none()
    );
}
