use crate::conversation::{Conversation, SharedConversation};
use crate::error::ChatError;
use crate::responder::{ReplyStream, Responder};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Which provider a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelChoice {
    #[serde(rename = "GPT")]
    Gpt,
    Claude,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 2] = [ModelChoice::Gpt, ModelChoice::Claude];

    pub fn label(self) -> &'static str {
        match self {
            ModelChoice::Gpt => "GPT",
            ModelChoice::Claude => "Claude",
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModelChoice {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelChoice::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| ChatError::UnknownModel(s.to_string()))
    }
}

/// Per-browser state: one independent conversation per provider track.
#[derive(Debug, Default)]
pub struct Session {
    tracks: HashMap<ModelChoice, SharedConversation>,
}

impl Session {
    pub fn new(choices: &[ModelChoice]) -> Self {
        Self::seeded(choices.iter().map(|&c| (c, Conversation::new())))
    }

    pub fn seeded(tracks: impl IntoIterator<Item = (ModelChoice, Conversation)>) -> Self {
        Self {
            tracks: tracks.into_iter().map(|(c, conv)| (c, conv.shared())).collect(),
        }
    }

    pub fn track(&self, choice: ModelChoice) -> Option<SharedConversation> {
        self.tracks.get(&choice).cloned()
    }
}

/// Routes a message to the responder and conversation track of the chosen
/// provider.
pub struct Dispatcher {
    routes: Vec<(ModelChoice, Responder)>,
    default: ModelChoice,
}

impl Dispatcher {
    pub fn new(routes: Vec<(ModelChoice, Responder)>, default: ModelChoice) -> Result<Self, ChatError> {
        if !routes.iter().any(|(c, _)| *c == default) {
            return Err(ChatError::ModelUnavailable(default.label().to_string()));
        }
        Ok(Self { routes, default })
    }

    pub fn choices(&self) -> Vec<ModelChoice> {
        self.routes.iter().map(|(c, _)| *c).collect()
    }

    pub fn default_choice(&self) -> ModelChoice {
        self.default
    }

    pub fn new_session(&self) -> Session {
        Session::new(&self.choices())
    }

    fn responder(&self, choice: ModelChoice) -> Option<&Responder> {
        self.routes.iter().find(|(c, _)| *c == choice).map(|(_, r)| r)
    }

    /// Resolve a UI label; `None` means the default choice.
    pub fn select(&self, label: Option<&str>) -> Result<ModelChoice, ChatError> {
        let choice = match label {
            Some(l) => l.parse::<ModelChoice>()?,
            None => self.default,
        };
        if self.responder(choice).is_none() {
            return Err(ChatError::ModelUnavailable(choice.label().to_string()));
        }
        Ok(choice)
    }

    /// Parse `label` and start a reply. Selection and input errors are
    /// returned before any provider is contacted.
    pub fn dispatch(&self, session: &Session, message: &str, label: &str) -> Result<ReplyStream, ChatError> {
        let choice = self.select(Some(label))?;
        self.dispatch_choice(session, message, choice)
    }

    pub fn dispatch_choice(
        &self,
        session: &Session,
        message: &str,
        choice: ModelChoice,
    ) -> Result<ReplyStream, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let unavailable = || ChatError::ModelUnavailable(choice.label().to_string());
        let responder = self.responder(choice).ok_or_else(unavailable)?;
        let track = session.track(choice).ok_or_else(unavailable)?;

        tracing::info!(model = %choice, provider = responder.provider_name(), "dispatching message");
        Ok(responder.respond(message, track))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::provider::stub::StubProvider;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    struct Fixture {
        gpt: StubProvider,
        claude: StubProvider,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let gpt = StubProvider::scripted("gpt-stub", ["from ", "gpt"]);
        let claude = StubProvider::scripted("claude-stub", ["from ", "claude"]);
        let dispatcher = Dispatcher::new(
            vec![
                (ModelChoice::Gpt, Responder::new(Arc::new(gpt.clone()), "gpt-4")),
                (ModelChoice::Claude, Responder::new(Arc::new(claude.clone()), "claude")),
            ],
            ModelChoice::Claude,
        )
        .unwrap();
        Fixture { gpt, claude, dispatcher }
    }

    async fn drain(stream: ReplyStream) -> Vec<Result<String, ChatError>> {
        stream.collect().await
    }

    #[test]
    fn labels_parse_exactly() {
        assert_eq!("GPT".parse::<ModelChoice>().unwrap(), ModelChoice::Gpt);
        assert_eq!("Claude".parse::<ModelChoice>().unwrap(), ModelChoice::Claude);
        assert!(matches!("gpt".parse::<ModelChoice>(), Err(ChatError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn gpt_label_only_touches_gpt() {
        let f = fixture();
        let session = f.dispatcher.new_session();

        let out = drain(f.dispatcher.dispatch(&session, "hello", "GPT").unwrap()).await;
        assert_eq!(out.last().unwrap().as_ref().unwrap(), "from gpt");

        assert_eq!(f.gpt.calls().len(), 1);
        assert!(f.claude.calls().is_empty());
        assert_eq!(session.track(ModelChoice::Gpt).unwrap().lock().await.len(), 2);
        assert!(session.track(ModelChoice::Claude).unwrap().lock().await.is_empty());
    }

    #[tokio::test]
    async fn claude_label_only_touches_claude() {
        let f = fixture();
        let session = f.dispatcher.new_session();

        let out = drain(f.dispatcher.dispatch(&session, "hello", "Claude").unwrap()).await;
        assert_eq!(out.last().unwrap().as_ref().unwrap(), "from claude");

        assert!(f.gpt.calls().is_empty());
        assert_eq!(f.claude.calls().len(), 1);
        assert!(session.track(ModelChoice::Gpt).unwrap().lock().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_label_fails_before_any_call() {
        let f = fixture();
        let session = f.dispatcher.new_session();

        let err = match f.dispatcher.dispatch(&session, "hello", "Mistral") {
            Ok(_) => panic!("Mistral should be rejected"),
            Err(e) => e,
        };
        assert!(matches!(err, ChatError::UnknownModel(ref m) if m == "Mistral"));
        assert!(f.gpt.calls().is_empty());
        assert!(f.claude.calls().is_empty());
        for c in ModelChoice::ALL {
            assert!(session.track(c).unwrap().lock().await.is_empty());
        }
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let f = fixture();
        let session = f.dispatcher.new_session();
        assert!(matches!(
            f.dispatcher.dispatch(&session, "   ", "GPT"),
            Err(ChatError::EmptyMessage)
        ));
        assert!(f.gpt.calls().is_empty());
    }

    #[tokio::test]
    async fn seeded_tracks_do_not_cross_contaminate() {
        let f = fixture();
        let session = Session::seeded([
            (ModelChoice::Gpt, Conversation::from_exchanges([("gpt q", "gpt a")])),
            (ModelChoice::Claude, Conversation::from_exchanges([("claude q", "claude a")])),
        ]);

        drain(f.dispatcher.dispatch(&session, "only for gpt", "GPT").unwrap()).await;
        drain(f.dispatcher.dispatch(&session, "only for claude", "Claude").unwrap()).await;

        let gpt = session.track(ModelChoice::Gpt).unwrap();
        let gpt = gpt.lock().await;
        let claude = session.track(ModelChoice::Claude).unwrap();
        let claude = claude.lock().await;

        assert!(gpt.turns().contains(&Turn::user("only for gpt")));
        assert!(!gpt.turns().iter().any(|t| t.content.contains("claude")));
        assert!(claude.turns().contains(&Turn::user("only for claude")));
        assert!(!claude.turns().iter().any(|t| t.content.contains("gpt")));

        // The outbound request carried only the matching track's history.
        assert!(f.gpt.calls()[0].messages.contains(&Turn::user("gpt q")));
        assert!(!f.claude.calls()[0].messages.contains(&Turn::user("gpt q")));
    }

    #[tokio::test]
    async fn single_provider_mode_rejects_the_other_track() {
        let gpt = StubProvider::scripted("gpt-stub", ["hi"]);
        let d = Dispatcher::new(
            vec![(ModelChoice::Gpt, Responder::new(Arc::new(gpt.clone()), "gpt-4o-mini"))],
            ModelChoice::Gpt,
        )
        .unwrap();
        let session = d.new_session();

        assert_eq!(d.select(None).unwrap(), ModelChoice::Gpt);
        assert!(matches!(
            d.dispatch(&session, "hi", "Claude"),
            Err(ChatError::ModelUnavailable(_))
        ));
        assert!(gpt.calls().is_empty());
    }

    #[test]
    fn default_must_be_routed() {
        assert!(Dispatcher::new(Vec::new(), ModelChoice::Claude).is_err());
    }
}
