//! Chat creation and membership rules.
//!
//! Storage only persists; the kind rules (private chats are fixed pairs,
//! channels take members from admins only) are enforced here.

use serde::{Deserialize, Serialize};
use tracing::info;

use blockpost_shared::{ChatId, ChatKind, UserId};
use blockpost_store::{Chat, ChatMember, ChatRole, Database};

use crate::error::ServerError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewChat {
    pub kind: ChatKind,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// A chat as one member sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: Chat,
    pub display_name: Option<String>,
    pub role: Option<ChatRole>,
}

fn view(db: &Database, chat: Chat, viewer: UserId) -> Result<ChatView, ServerError> {
    let display_name = db.chat_display_name(&chat, viewer)?;
    let role = db.member_role(chat.id, viewer)?;
    Ok(ChatView {
        chat,
        display_name,
        role,
    })
}

pub fn create_chat(
    db: &mut Database,
    creator: UserId,
    request: &NewChat,
) -> Result<ChatView, ServerError> {
    let mut others: Vec<UserId> = Vec::new();
    for member in &request.members {
        if *member != creator && !others.contains(member) {
            others.push(*member);
        }
    }

    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    match request.kind {
        ChatKind::Private => {
            if others.len() != 1 {
                return Err(ServerError::Validation(
                    "a private chat needs exactly one other member".into(),
                ));
            }
        }
        ChatKind::Group | ChatKind::Channel => {
            if name.is_none() {
                return Err(ServerError::Validation(format!(
                    "a {} chat needs a name",
                    request.kind
                )));
            }
        }
    }

    for member in &others {
        if !db.user_exists(*member)? {
            return Err(ServerError::NotFound(format!("user {member} does not exist")));
        }
    }

    let chat = db.create_chat(
        request.kind,
        if request.kind.requires_name() { name } else { None },
        creator,
        request.description.as_deref(),
        &others,
    )?;

    info!(
        chat_id = %chat.id,
        kind = %chat.kind,
        creator = %creator,
        members = others.len() + 1,
        "Chat created"
    );
    view(db, chat, creator)
}

pub fn list_chats(db: &Database, user: UserId) -> Result<Vec<ChatView>, ServerError> {
    db.list_chats_for_user(user)?
        .into_iter()
        .map(|chat| view(db, chat, user))
        .collect()
}

/// Load a chat the requester belongs to.
fn member_chat(db: &Database, chat: ChatId, requester: UserId) -> Result<Chat, ServerError> {
    let chat = db.get_chat(chat)?;
    if !db.is_member(chat.id, requester)? {
        return Err(ServerError::Forbidden("not a member of this chat".into()));
    }
    Ok(chat)
}

pub fn chat_info(db: &Database, chat: ChatId, requester: UserId) -> Result<ChatView, ServerError> {
    let chat = member_chat(db, chat, requester)?;
    view(db, chat, requester)
}

pub fn list_members(
    db: &Database,
    chat: ChatId,
    requester: UserId,
) -> Result<Vec<ChatMember>, ServerError> {
    member_chat(db, chat, requester)?;
    Ok(db.list_members(chat)?)
}

pub fn add_member(
    db: &Database,
    chat: ChatId,
    requester: UserId,
    user: UserId,
    display_name: Option<&str>,
) -> Result<ChatMember, ServerError> {
    let chat = db.get_chat(chat)?;
    if !chat.kind.allows_membership_changes() {
        return Err(ServerError::Validation(
            "private chat membership is fixed".into(),
        ));
    }
    if !db.is_member(chat.id, requester)? {
        return Err(ServerError::Forbidden("not a member of this chat".into()));
    }
    if chat.kind.add_requires_admin() {
        let allowed = db
            .member_role(chat.id, requester)?
            .is_some_and(|role| role.can_manage_members());
        if !allowed {
            return Err(ServerError::Forbidden(
                "only owners and admins add channel members".into(),
            ));
        }
    }
    if !db.user_exists(user)? {
        return Err(ServerError::NotFound(format!("user {user} does not exist")));
    }

    let member = db.add_member(chat.id, user, display_name)?;
    info!(chat_id = %chat.id, user = %user, by = %requester, "Member added");
    Ok(member)
}

pub fn remove_member(
    db: &Database,
    chat: ChatId,
    requester: UserId,
    user: UserId,
) -> Result<(), ServerError> {
    let chat = db.get_chat(chat)?;
    if !chat.kind.allows_membership_changes() {
        return Err(ServerError::Validation(
            "private chat membership is fixed".into(),
        ));
    }
    if !db.is_member(chat.id, requester)? {
        return Err(ServerError::Forbidden("not a member of this chat".into()));
    }

    if requester == user {
        if db.member_role(chat.id, user)? == Some(ChatRole::Owner) {
            return Err(ServerError::Forbidden(
                "the owner must hand over ownership before leaving".into(),
            ));
        }
    } else {
        let requester_role = db.member_role(chat.id, requester)?;
        if !requester_role.is_some_and(|role| role.can_manage_members()) {
            return Err(ServerError::Forbidden(
                "only owners and admins remove other members".into(),
            ));
        }
        let target_role = db.member_role(chat.id, user)?;
        if target_role == Some(ChatRole::Owner) && requester_role != Some(ChatRole::Owner) {
            return Err(ServerError::Forbidden("the owner cannot be removed".into()));
        }
    }

    if !db.remove_member(chat.id, user)? {
        return Err(ServerError::NotFound(format!(
            "user {user} is not a member of this chat"
        )));
    }
    info!(chat_id = %chat.id, user = %user, by = %requester, "Member removed");
    Ok(())
}

/// Change `user`'s role. Only the owner assigns roles: `Admin` promotes,
/// `None` demotes to a plain member, and `Owner` hands ownership over
/// (the previous owner becomes an admin). Returns the target's new role.
pub fn set_role(
    db: &mut Database,
    chat: ChatId,
    requester: UserId,
    user: UserId,
    role: Option<ChatRole>,
) -> Result<Option<ChatRole>, ServerError> {
    let chat = db.get_chat(chat)?;
    if !chat.kind.allows_membership_changes() {
        return Err(ServerError::Validation("private chats have no roles".into()));
    }
    if !db.is_member(chat.id, requester)? {
        return Err(ServerError::Forbidden("not a member of this chat".into()));
    }
    if db.member_role(chat.id, requester)? != Some(ChatRole::Owner) {
        return Err(ServerError::Forbidden("only the owner assigns roles".into()));
    }
    if requester == user {
        return Err(ServerError::Validation(
            "the owner's role changes only by handing ownership over".into(),
        ));
    }
    if !db.is_member(chat.id, user)? {
        return Err(ServerError::NotFound(format!(
            "user {user} is not a member of this chat"
        )));
    }

    match role {
        Some(ChatRole::Owner) => db.transfer_ownership(chat.id, requester, user)?,
        Some(role) => db.assign_role(chat.id, user, role)?,
        None => {
            db.clear_role(chat.id, user)?;
        }
    }

    info!(
        chat_id = %chat.id,
        user = %user,
        role = role.map(|r| r.as_str()).unwrap_or("member"),
        by = %requester,
        "Role changed"
    );
    Ok(role)
}
