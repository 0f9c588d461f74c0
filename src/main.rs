//! Console transport for the conversation dispatcher
//!
//! Reads `conversation|author|text` lines from stdin (a bare line goes to the
//! `console` conversation) and prints replies to stdout.

use anyhow::Context;
use async_trait::async_trait;
use conversation_dispatch::completion::HttpCompletionClient;
use conversation_dispatch::config::Config;
use conversation_dispatch::context::{
    ContextTrimmer, ConversationHistoryStore, ConversationKey, PromptSeed, TokenEncoder,
};
use conversation_dispatch::dispatch::{
    AuthorIdentity, ConversationDispatcher, DispatcherSettings, InboundTurn, OutboundReply,
    ReplySink, TypingIndicator,
};
use conversation_dispatch::logging;
use conversation_dispatch::policy::{AlwaysRespond, MentionOrChance, ResponsePolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

struct ConsoleSink;

#[async_trait]
impl ReplySink for ConsoleSink {
    async fn deliver(&self, reply: OutboundReply) -> anyhow::Result<()> {
        match reply.in_reply_to_message_id {
            Some(id) => println!("[{}] (re #{}) {}", reply.conversation_key, id, reply.text),
            None => println!("[{}] {}", reply.conversation_key, reply.text),
        }
        Ok(())
    }
}

struct ConsoleTyping;

#[async_trait]
impl TypingIndicator for ConsoleTyping {
    async fn typing(&self, key: &ConversationKey) {
        debug!(conversation = %key, "typing...");
    }
}

fn parse_line(line: &str, message_id: i64) -> Option<InboundTurn> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line.splitn(3, '|').map(str::trim).collect();
    let (conversation, author, text) = match parts.as_slice() {
        [conversation, author, text] => (*conversation, *author, *text),
        _ => ("console", "you", line),
    };

    Some(InboundTurn::new(
        conversation,
        AuthorIdentity::new(author, None),
        text,
        message_id,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;
    logging::init(&config.logging);

    let seed = match &config.dispatch.prompts_path {
        Some(path) => PromptSeed::from_file(path)?,
        None => PromptSeed::default(),
    };

    let encoder = TokenEncoder::for_model(&config.completion.model);
    let client = HttpCompletionClient::new(&config.completion)?;
    info!(
        endpoint = %client.url(),
        model = %config.completion.model,
        budget = config.context.budget,
        seeded_turns = seed.turns().len(),
        "Dispatcher initialized"
    );

    let dispatcher = ConversationDispatcher::builder(
        Arc::new(ConversationHistoryStore::new()),
        ContextTrimmer::new(Arc::new(encoder)),
        Arc::new(client),
        Arc::new(ConsoleSink),
    )
    .typing(Arc::new(ConsoleTyping))
    .seed(seed)
    .settings(DispatcherSettings::from(&config))
    .build();

    let policy: Box<dyn ResponsePolicy> = if config.policy.mention_keywords.is_empty() {
        Box::new(AlwaysRespond)
    } else {
        Box::new(MentionOrChance::from_config(&config.policy))
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_id = 0_i64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        message_id += 1;
        let Some(inbound) = parse_line(&line, message_id) else {
            continue;
        };
        if !policy.should_respond(&inbound) {
            debug!(conversation = %inbound.conversation_key, "Skipping message");
            continue;
        }
        if let Err(e) = dispatcher.dispatch(inbound).await {
            warn!("Dispatch failed: {}", e);
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}
