use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    error::{ChatError, ChatResult},
    events::{ClientEvent, NewMessage, PrivateMessageEvent, ServerEvent},
    presence::Presence,
    registry::{ConnectionId, Identity},
    store::{Store, UserId},
};

/// Persists inbound messages and hands them to the right connections.
///
/// Persist-then-deliver runs under `ordering`, so the order in which events
/// reach any outbox is the order the rows were committed in.
#[derive(Clone)]
pub struct MessageRouter {
    store: Store,
    presence: Presence,
    ordering: Arc<Mutex<()>>,
}

impl MessageRouter {
    pub fn new(store: Store, presence: Presence) -> MessageRouter {
        MessageRouter {
            store,
            presence,
            ordering: Arc::new(Mutex::new(())),
        }
    }

    pub async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) -> ChatResult<usize> {
        match event {
            ClientEvent::SendMessage { content, receiver_id: None } => self.send_room(conn, &content).await,
            ClientEvent::SendMessage { content, receiver_id: Some(receiver_id) } => {
                self.send_addressed(conn, receiver_id, &content).await
            }
            ClientEvent::SendPrivateMessage { receiver_id, content } => {
                self.send_private(conn, receiver_id, &content).await
            }
        }
    }

    /// Returns the number of connections the message was queued on.
    pub async fn send_room(&self, conn: ConnectionId, content: &str) -> ChatResult<usize> {
        let sender = self.sender(conn)?;
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let _order = self.ordering.lock().await;
        let message = self.store.append_room_message(sender.id, content).await?;
        let delivered = self.presence.broadcast(ServerEvent::NewMessage(NewMessage {
            sender: sender.username,
            content: message.content,
            timestamp: message.timestamp,
            receiver_id: None,
        }));
        debug!("room message {} fanned out to {delivered} connections", message.id);

        Ok(delivered)
    }

    /// A `send_message` that names a receiver. The row lands in the message
    /// table with its receiver set, and the `new_message` goes to the
    /// connections of both parties instead of the whole room.
    pub async fn send_addressed(&self, conn: ConnectionId, receiver_id: UserId, content: &str) -> ChatResult<usize> {
        let sender = self.sender(conn)?;
        if receiver_id == sender.id {
            info!("dropped addressed message from @{} to themselves", sender.username);
            return Err(ChatError::SelfSend);
        }
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let _order = self.ordering.lock().await;
        let message = self.store.append_addressed_message(sender.id, receiver_id, content).await?;
        let event = ServerEvent::NewMessage(NewMessage {
            sender: sender.username,
            content: message.content,
            timestamp: message.timestamp,
            receiver_id: Some(receiver_id),
        });
        let delivered =
            self.presence.send_to_user(receiver_id, event.clone()) + self.presence.send_to_user(sender.id, event);
        debug!("addressed message {} delivered to {delivered} connections", message.id);

        Ok(delivered)
    }

    /// Delivers to the receiver's live connections only. The sender gets no echo.
    pub async fn send_private(&self, conn: ConnectionId, receiver_id: UserId, content: &str) -> ChatResult<usize> {
        let sender = self.sender(conn)?;
        if receiver_id == sender.id {
            info!("dropped private message from @{} to themselves", sender.username);
            return Err(ChatError::SelfSend);
        }
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }
        if self.store.find_user_by_id(receiver_id).await?.is_none() {
            debug!("dropped private message from @{} to unknown #{receiver_id}", sender.username);
            return Err(ChatError::UnknownReceiver(receiver_id));
        }

        let _order = self.ordering.lock().await;
        let message = self.store.append_private_message(sender.id, receiver_id, content).await?;
        let id = message.id;
        let delivered = self.presence.send_to_user(
            receiver_id,
            ServerEvent::PrivateMessage(PrivateMessageEvent {
                message,
                sender_username: sender.username,
            }),
        );
        debug!("private message {id} delivered to {delivered} connections of #{receiver_id}");

        Ok(delivered)
    }

    fn sender(&self, conn: ConnectionId) -> ChatResult<Identity> {
        self.presence.identity_of(conn).ok_or(ChatError::AuthRequired)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;

    struct Harness {
        store: Store,
        presence: Presence,
        router: MessageRouter,
    }

    impl Harness {
        async fn new() -> Harness {
            let store = Store::in_memory().await.unwrap();
            let presence = Presence::default();
            let router = MessageRouter::new(store.clone(), presence.clone());
            Harness { store, presence, router }
        }

        async fn user(&self, username: &str) -> Identity {
            let id = self.store.create_user(username, "hash").await.unwrap();
            Identity { id, username: username.to_owned() }
        }

        fn connect(&self, who: &Identity) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
            let conn = ConnectionId::new();
            let (outbox, mut inbox) = mpsc::unbounded_channel();
            self.presence.join(conn, who.clone(), outbox).unwrap();
            while inbox.try_recv().is_ok() {}
            (conn, inbox)
        }
    }

    fn drain(inbox: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = inbox.try_recv() {
            events.push(event);
        }
        events
    }

    fn private_messages(events: &[ServerEvent]) -> Vec<&PrivateMessageEvent> {
        events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::PrivateMessage(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn room_message_reaches_everyone() {
        let h = Harness::new().await;
        let (alice, bob) = (h.user("alice").await, h.user("bob").await);
        let (alice_conn, mut alice_inbox) = h.connect(&alice);
        let (_, mut bob_inbox) = h.connect(&bob);
        drain(&mut alice_inbox);

        assert_eq!(h.router.send_room(alice_conn, "hi").await.unwrap(), 2);

        for inbox in [&mut alice_inbox, &mut bob_inbox] {
            match drain(inbox).as_slice() {
                [ServerEvent::NewMessage(message)] => {
                    assert_eq!(message.sender, "alice");
                    assert_eq!(message.content, "hi");
                    assert_eq!(message.receiver_id, None);
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn concurrent_room_sends_arrive_in_commit_order() {
        let h = Harness::new().await;
        let (alice, bob) = (h.user("alice").await, h.user("bob").await);
        let (alice_conn, _alice_inbox) = h.connect(&alice);
        let (bob_conn, mut bob_inbox) = h.connect(&bob);

        let sends = (0..20).map(|i| {
            let router = h.router.clone();
            let conn = if i % 2 == 0 { alice_conn } else { bob_conn };
            async move { router.send_room(conn, &format!("m{i}")).await.unwrap() }
        });
        join_all(sends).await;

        let received: Vec<_> = drain(&mut bob_inbox)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::NewMessage(message) => Some(message),
                _ => None,
            })
            .collect();
        let stored = h.store.list_room_messages().await.unwrap();

        assert_eq!(received.len(), 20);
        assert_eq!(
            received.iter().map(|m| &m.content).collect::<Vec<_>>(),
            stored.iter().map(|m| &m.content).collect::<Vec<_>>()
        );
        assert!(received.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn private_message_reaches_only_the_receiver() {
        let h = Harness::new().await;
        let (alice, bob, carol) = (h.user("alice").await, h.user("bob").await, h.user("carol").await);
        let (alice_conn, mut alice_inbox) = h.connect(&alice);
        let (_, mut alice_other_inbox) = h.connect(&alice);
        let (_, mut bob_phone) = h.connect(&bob);
        let (_, mut bob_laptop) = h.connect(&bob);
        let (_, mut carol_inbox) = h.connect(&carol);
        for inbox in [&mut alice_inbox, &mut alice_other_inbox, &mut bob_phone, &mut bob_laptop] {
            drain(inbox);
        }

        assert_eq!(h.router.send_private(alice_conn, bob.id, "secret").await.unwrap(), 2);

        for inbox in [&mut bob_phone, &mut bob_laptop] {
            let events = drain(inbox);
            let messages = private_messages(&events);
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].message.sender_id, alice.id);
            assert_eq!(messages[0].message.receiver_id, bob.id);
            assert_eq!(messages[0].message.content, "secret");
            assert!(!messages[0].message.is_read);
            assert_eq!(messages[0].sender_username, "alice");
        }
        assert!(drain(&mut alice_inbox).is_empty());
        assert!(drain(&mut alice_other_inbox).is_empty());
        assert!(drain(&mut carol_inbox).is_empty());
        assert_eq!(h.store.list_conversation(bob.id, alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn private_message_to_self_is_dropped() {
        let h = Harness::new().await;
        let alice = h.user("alice").await;
        let (conn, mut inbox) = h.connect(&alice);

        let err = h.router.send_private(conn, alice.id, "note to self").await.unwrap_err();
        assert!(matches!(err, ChatError::SelfSend));
        assert!(drain(&mut inbox).is_empty());
        assert!(h.store.list_conversation(alice.id, alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_message_to_unknown_user_is_dropped() {
        let h = Harness::new().await;
        let (alice, bob) = (h.user("alice").await, h.user("bob").await);
        let (conn, mut alice_inbox) = h.connect(&alice);
        let (_, mut bob_inbox) = h.connect(&bob);
        drain(&mut alice_inbox);

        let err = h.router.send_private(conn, 4242, "hello?").await.unwrap_err();
        assert!(matches!(err, ChatError::UnknownReceiver(4242)));
        assert!(err.is_silent());
        assert!(drain(&mut alice_inbox).is_empty());
        assert!(drain(&mut bob_inbox).is_empty());
        assert!(h.store.list_conversation(alice.id, 4242).await.unwrap().is_empty());

        // the connection keeps working afterwards
        assert_eq!(h.router.send_room(conn, "still here").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unbound_connection_is_ignored() {
        let h = Harness::new().await;
        let bob = h.user("bob").await;
        let (_, mut bob_inbox) = h.connect(&bob);
        let stranger = ConnectionId::new();

        assert!(matches!(h.router.send_room(stranger, "hi").await, Err(ChatError::AuthRequired)));
        assert!(matches!(
            h.router.send_private(stranger, bob.id, "hi").await,
            Err(ChatError::AuthRequired)
        ));
        assert!(drain(&mut bob_inbox).is_empty());
        assert!(h.store.list_room_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_message_with_receiver_reaches_both_parties_only() {
        let h = Harness::new().await;
        let (alice, bob, carol) = (h.user("alice").await, h.user("bob").await, h.user("carol").await);
        let (alice_conn, mut alice_inbox) = h.connect(&alice);
        let (_, mut bob_inbox) = h.connect(&bob);
        let (_, mut carol_inbox) = h.connect(&carol);
        for inbox in [&mut alice_inbox, &mut bob_inbox] {
            drain(inbox);
        }

        let event = ClientEvent::SendMessage { content: "dm".into(), receiver_id: Some(bob.id) };
        assert_eq!(h.router.dispatch(alice_conn, event).await.unwrap(), 2);

        for inbox in [&mut bob_inbox, &mut alice_inbox] {
            match drain(inbox).as_slice() {
                [ServerEvent::NewMessage(message)] => {
                    assert_eq!(message.sender, "alice");
                    assert_eq!(message.content, "dm");
                    assert_eq!(message.receiver_id, Some(bob.id));
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
        assert!(drain(&mut carol_inbox).is_empty());
        assert!(h.store.list_room_messages().await.unwrap().is_empty());
        assert!(h.store.list_conversation(alice.id, bob.id).await.unwrap().is_empty());

        let event = ClientEvent::SendMessage { content: "ghost".into(), receiver_id: Some(4242) };
        assert!(matches!(
            h.router.dispatch(alice_conn, event).await,
            Err(ChatError::UnknownReceiver(4242))
        ));
        let event = ClientEvent::SendMessage { content: "me".into(), receiver_id: Some(alice.id) };
        assert!(matches!(h.router.dispatch(alice_conn, event).await, Err(ChatError::SelfSend)));
        assert!(drain(&mut alice_inbox).is_empty());
        assert!(drain(&mut bob_inbox).is_empty());
    }

    #[tokio::test]
    async fn blank_messages_are_dropped() {
        let h = Harness::new().await;
        let (alice, bob) = (h.user("alice").await, h.user("bob").await);
        let (conn, mut alice_inbox) = h.connect(&alice);
        let (_, mut bob_inbox) = h.connect(&bob);
        drain(&mut alice_inbox);

        assert!(matches!(h.router.send_room(conn, "   ").await, Err(ChatError::EmptyContent)));
        assert!(matches!(h.router.send_private(conn, bob.id, "").await, Err(ChatError::EmptyContent)));
        assert!(drain(&mut bob_inbox).is_empty());
    }
}
