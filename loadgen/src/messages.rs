//! Message payloads carried by load transactions.
//!
//! The dispatch engine never looks inside a [`Message`]: it is a type URL plus
//! a JSON body handed as-is to the signer. Builders here produce the few
//! payloads a run needs (posts, a profile and fee transfers).

use std::{ops::Deref, sync::Arc};

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::transaction::Coin;

pub const CREATE_POST_TYPE_URL: &str = "/desmos.posts.v3.MsgCreatePost";
pub const SAVE_PROFILE_TYPE_URL: &str = "/desmos.profiles.v3.MsgSaveProfile";
pub const BANK_SEND_TYPE_URL: &str = "/cosmos.bank.v1beta1.MsgSend";

const POST_TEXT: &str = "Lorem ipsum dolor sit amet, id veri scriptorem mei, in pri meliore incorrupte, at repudiandae vituperatoribus duo. Et cum commune qualisque, aperiam voluptua voluptatum mei ad. Eripuit explicari laboramus mel no, vix et causae omnesque, nibh tempor perfecto vis at. Ne quis denique copiosae est, sit et volumus abhorreant dissentiet, malorum inermis intellegebat mea an. Tempor iisque sit ne.";

const NICKNAME_SUFFIX_LEN: usize = 10;

/// Opaque message: a type URL and its JSON encoded body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "@type")]
    pub type_url: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Message {
    fn from_json(type_url: &str, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            type_url: type_url.to_owned(),
            body,
        }
    }
}

/// Ordered messages broadcast together in one transaction.
///
/// Cloning is cheap: the messages are shared, a worker reuses the very same
/// batch for every broadcast of its run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageBatch(Arc<[Message]>);

impl MessageBatch {
    pub fn new(messages: Vec<Message>) -> Self {
        Self(messages.into())
    }
}

impl Deref for MessageBatch {
    type Target = [Message];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Build `size` identical posts in the given subspace
pub fn post_batch(subspace_id: u64, size: usize, author: &str) -> MessageBatch {
    let post = Message::from_json(
        CREATE_POST_TYPE_URL,
        json!({
            "subspace_id": subspace_id.to_string(),
            "section_id": 0,
            "external_id": "",
            "text": POST_TEXT,
            "conversation_id": "0",
            "reply_settings": "REPLY_SETTING_EVERYONE",
            "entities": null,
            "tags": [],
            "attachments": [],
            "referenced_posts": [],
            "author": author,
        }),
    );
    MessageBatch::new(vec![post; size])
}

// Profile registration with a random nickname
pub fn save_profile<R: Rng + ?Sized>(creator: &str, rng: &mut R) -> MessageBatch {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(NICKNAME_SUFFIX_LEN)
        .map(char::from)
        .collect();

    let profile = Message::from_json(
        SAVE_PROFILE_TYPE_URL,
        json!({
            "dtag": format!("tester_{}", suffix),
            "nickname": "tester",
            "bio": "",
            "profile_picture": "",
            "cover_picture": "",
            "creator": creator,
        }),
    );
    MessageBatch::new(vec![profile])
}

// One transfer of `amount` from `from` to every recipient
pub fn bank_send_batch(from: &str, recipients: &[String], amount: &[Coin]) -> MessageBatch {
    let messages = recipients
        .iter()
        .map(|to| {
            Message::from_json(
                BANK_SEND_TYPE_URL,
                json!({
                    "from_address": from,
                    "to_address": to,
                    "amount": amount,
                }),
            )
        })
        .collect();
    MessageBatch::new(messages)
}
