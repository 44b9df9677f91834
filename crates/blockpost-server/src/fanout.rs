//! Fan-out sender: one block per send, one transaction and payload per
//! valid recipient.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use blockpost_shared::hashing::payload_hash;
use blockpost_shared::identity::{is_signature_encoding, verify_signature};
use blockpost_shared::{BlockId, ChatId, TransactionId, UserId};
use blockpost_store::{chats, ledger, Database, NewTransaction, StoreError};

use crate::chain;
use crate::error::ServerError;
use crate::notify::{Event, EventPublisher};

/// One recipient's ciphertext, produced and signed by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Delivery {
    pub receiver_id: UserId,
    pub ciphertext: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub block_id: BlockId,
    pub block_hash: String,
    pub sent_count: usize,
    pub transaction_ids: Vec<TransactionId>,
    /// (receiver, transaction) pairs actually written.
    #[serde(skip)]
    pub recipients: Vec<(UserId, TransactionId)>,
}

fn check_delivery(ciphertext: &str, signature: &str) -> Result<(), ServerError> {
    if ciphertext.trim().is_empty() {
        return Err(ServerError::Validation("ciphertext must not be empty".into()));
    }
    if !is_signature_encoding(signature) {
        return Err(ServerError::Validation(
            "signature must be a base64 Ed25519 signature".into(),
        ));
    }
    Ok(())
}

/// Record one chat message as per-recipient copies.
///
/// Receivers that are not current members are dropped silently, and a
/// receiver listed twice keeps its first copy. Only the kept deliveries
/// are validated. The whole send is one storage transaction; an empty
/// result still appends its block.
pub fn send(
    db: &mut Database,
    sender: UserId,
    chat: ChatId,
    deliveries: &[Delivery],
) -> Result<SendReceipt, ServerError> {
    let tx = db.write_transaction()?;

    chats::get_chat(&tx, chat)?;
    if !chats::is_member(&tx, chat, sender)? {
        return Err(ServerError::Forbidden("not a member of this chat".into()));
    }
    let members: HashSet<UserId> = chats::list_member_ids(&tx, chat)?.into_iter().collect();

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for delivery in deliveries {
        if !members.contains(&delivery.receiver_id) {
            debug!(chat_id = %chat, receiver = %delivery.receiver_id, "Dropping non-member recipient");
            continue;
        }
        if seen.insert(delivery.receiver_id) {
            check_delivery(&delivery.ciphertext, &delivery.signature)?;
            kept.push(delivery);
        }
    }

    let (block_id, block_hash) = chain::append_block(&tx, sender)?;

    let mut recipients = Vec::with_capacity(kept.len());
    for delivery in kept {
        let hash = payload_hash(&delivery.ciphertext);
        let id = ledger::insert_transaction(
            &tx,
            block_id,
            &NewTransaction {
                sender_id: sender,
                receiver_id: delivery.receiver_id,
                chat_id: Some(chat),
                ciphertext: &delivery.ciphertext,
                payload_hash: &hash,
                signature: &delivery.signature,
            },
        )?;
        recipients.push((delivery.receiver_id, id));
    }

    tx.commit().map_err(StoreError::from)?;

    info!(
        chat_id = %chat,
        sender = %sender,
        block_id = %block_id,
        sent = recipients.len(),
        requested = deliveries.len(),
        "Message fanned out"
    );

    Ok(SendReceipt {
        block_id,
        block_hash,
        sent_count: recipients.len(),
        transaction_ids: recipients.iter().map(|(_, id)| *id).collect(),
        recipients,
    })
}

/// A direct message outside any chat.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectMessage {
    pub receiver_id: UserId,
    pub ciphertext: String,
    pub signature: String,
    /// Plaintext the signature covers; when present the signature is
    /// checked against the sender's published key.
    pub original: Option<String>,
}

pub fn send_direct(
    db: &mut Database,
    sender: UserId,
    message: &DirectMessage,
) -> Result<SendReceipt, ServerError> {
    check_delivery(&message.ciphertext, &message.signature)?;

    if !db.user_exists(message.receiver_id)? {
        return Err(ServerError::NotFound("receiver does not exist".into()));
    }
    let Some(sender_key) = db.get_public_key(sender)? else {
        return Err(ServerError::Validation("sender has no public key".into()));
    };
    if db.get_public_key(message.receiver_id)?.is_none() {
        return Err(ServerError::Validation("receiver has no public key".into()));
    }
    if let Some(original) = &message.original {
        if !verify_signature(original.as_bytes(), &message.signature, &sender_key) {
            return Err(ServerError::Validation("signature does not match message".into()));
        }
    }

    let tx = db.write_transaction()?;
    let (block_id, block_hash) = chain::append_block(&tx, sender)?;
    let hash = payload_hash(&message.ciphertext);
    let id = ledger::insert_transaction(
        &tx,
        block_id,
        &NewTransaction {
            sender_id: sender,
            receiver_id: message.receiver_id,
            chat_id: None,
            ciphertext: &message.ciphertext,
            payload_hash: &hash,
            signature: &message.signature,
        },
    )?;
    tx.commit().map_err(StoreError::from)?;

    info!(sender = %sender, receiver = %message.receiver_id, block_id = %block_id, "Direct message recorded");

    Ok(SendReceipt {
        block_id,
        block_hash,
        sent_count: 1,
        transaction_ids: vec![id],
        recipients: vec![(message.receiver_id, id)],
    })
}

/// Push a `Message` event to every recipient except the sender.
pub async fn announce<P: EventPublisher>(
    publisher: &P,
    sender: UserId,
    chat: Option<ChatId>,
    receipt: &SendReceipt,
) {
    for (receiver, transaction_id) in &receipt.recipients {
        if *receiver == sender {
            continue;
        }
        publisher
            .publish(
                *receiver,
                Event::Message {
                    chat_id: chat,
                    transaction_id: *transaction_id,
                    from_user_id: sender,
                },
            )
            .await;
    }
}
