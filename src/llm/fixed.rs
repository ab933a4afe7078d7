//! Fixed-reply model
//!
//! Stands in for the language model when no endpoint is configured. It keeps
//! no state, so a long-running server can answer indefinitely with it.

use super::{ChatModel, ModelReply};
use crate::models::Message;
use crate::tools::ToolSchema;
use crate::Result;
use async_trait::async_trait;

pub struct FixedReplyModel {
    reply: String,
}

impl FixedReplyModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl ChatModel for FixedReplyModel {
    fn name(&self) -> &str {
        "fixed-reply"
    }

    async fn invoke(&self, _messages: &[Message], _tools: &[ToolSchema]) -> Result<ModelReply> {
        Ok(ModelReply::text(self.reply.clone()))
    }
}
