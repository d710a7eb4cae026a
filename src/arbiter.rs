use chess::Color;
use log::{error, info, warn};
use thiserror::Error;

use crate::agent::AgentTransport;
use crate::board::{GameBoard, GameOutcome};
use crate::engine::{EngineError, FallbackProvider};
use crate::history::{ConversationHistory, Message};
use crate::moves::{format_coordinate, parse_coordinate};
use crate::protocol::request_agent_move;

pub const MIN_SEARCH_DEPTH: u32 = 3;
pub const MAX_SEARCH_DEPTH: u32 = 50;

const SYSTEM_DIRECTIVE: &str =
    "Act as a strong chess engine. Fetch the board information you need with the \
     available tool, then answer with only the best move in lowercase UCI coordinate \
     notation (e.g. e2e4), with no commentary.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("search depth must be between 3 and 50, got {0}")]
pub struct DepthOutOfRange(pub u32);

/// Immutable per-session settings. Replaced wholesale when a new session
/// begins; there is no partial mutation.
#[derive(Clone, Copy, Debug)]
pub struct GameConfig {
    pub human_color: Color,
    pub search_depth: u32,
}

impl GameConfig {
    pub fn new(human_color: Color, search_depth: u32) -> Result<Self, DepthOutOfRange> {
        if !(MIN_SEARCH_DEPTH..=MAX_SEARCH_DEPTH).contains(&search_depth) {
            return Err(DepthOutOfRange(search_depth));
        }
        Ok(GameConfig {
            human_color,
            search_depth,
        })
    }
}

/// One complete game: board, settings and conversation log as a single
/// value owned by the caller. Construction is "new session", dropping it
/// is "session ended"; a reset builds a fresh value rather than resuming
/// the old one.
pub struct GameSession {
    pub config: GameConfig,
    pub board: GameBoard,
    pub history: ConversationHistory,
}

impl GameSession {
    pub fn new(config: GameConfig) -> Self {
        GameSession {
            config,
            board: GameBoard::new(),
            history: ConversationHistory::with_system(SYSTEM_DIRECTIVE),
        }
    }
}

/// Action supplied by the human-input collaborator. All of it is
/// untrusted; move strings are validated like any other candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HumanAction {
    Move(String),
    NewSession,
    Quit,
}

/// Source of human actions: a terminal prompt in the binary, a script in
/// tests.
pub trait HumanInput {
    fn read_action(&mut self, board: &GameBoard) -> HumanAction;
}

/// Read-only sink for board snapshots and user-facing notices. Purely
/// presentational; nothing feeds back into the arbitrator.
pub trait BoardObserver {
    fn show(&mut self, board: &GameBoard);
    fn notice(&mut self, text: &str);
}

/// How a call to [`Arbitrator::run`] ended.
#[derive(Debug)]
pub enum SessionEvent {
    GameOver(GameOutcome),
    ResetRequested,
    QuitRequested,
    /// The fallback engine failed. The session is left untouched, so the
    /// owner may retry the turn or abandon the session.
    EngineFailed(EngineError),
}

enum TurnFlow {
    Committed,
    Stop(SessionEvent),
}

/// Turn-resolution state machine. Owns neither the session nor the move
/// sources; it arbitrates between them, one strictly sequential turn at a
/// time.
pub struct Arbitrator<'a> {
    agent: &'a dyn AgentTransport,
    fallback: &'a dyn FallbackProvider,
}

impl<'a> Arbitrator<'a> {
    pub fn new(agent: &'a dyn AgentTransport, fallback: &'a dyn FallbackProvider) -> Self {
        Arbitrator { agent, fallback }
    }

    /// Drive the session until the game ends or the human interrupts it.
    /// Terminal positions are checked before each turn begins.
    pub fn run(
        &self,
        session: &mut GameSession,
        input: &mut dyn HumanInput,
        observer: &mut dyn BoardObserver,
    ) -> SessionEvent {
        loop {
            if let Some(outcome) = session.board.outcome() {
                observer.show(&session.board);
                info!("game over: {outcome}");
                return SessionEvent::GameOver(outcome);
            }

            observer.show(&session.board);
            let flow = if session.board.side_to_move() == session.config.human_color {
                self.human_turn(session, input, observer)
            } else {
                self.agent_turn(session, observer)
            };
            match flow {
                TurnFlow::Committed => {}
                TurnFlow::Stop(event) => return event,
            }
        }
    }

    /// Human turns recover locally: malformed or illegal input re-prompts
    /// with the board untouched, and never escalates to the fallback.
    fn human_turn(
        &self,
        session: &mut GameSession,
        input: &mut dyn HumanInput,
        observer: &mut dyn BoardObserver,
    ) -> TurnFlow {
        loop {
            match input.read_action(&session.board) {
                HumanAction::NewSession => return TurnFlow::Stop(SessionEvent::ResetRequested),
                HumanAction::Quit => return TurnFlow::Stop(SessionEvent::QuitRequested),
                HumanAction::Move(raw) => {
                    let normalized = raw.trim().to_lowercase();
                    let candidate = match parse_coordinate(&normalized) {
                        Ok(mv) => mv,
                        Err(e) => {
                            observer.notice(&format!("{e}; try something like e2e4"));
                            continue;
                        }
                    };
                    match session.board.apply(candidate) {
                        Ok(()) => {
                            info!("human played {}", format_coordinate(candidate));
                            return TurnFlow::Committed;
                        }
                        Err(e) => {
                            observer.notice(&e.to_string());
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Agent turns escalate: any protocol failure, and any candidate that
    /// is illegal at commit time, goes straight to the fallback engine
    /// for this turn only. The agent gets no second attempt within the
    /// same turn.
    fn agent_turn(&self, session: &mut GameSession, observer: &mut dyn BoardObserver) -> TurnFlow {
        let reason = match request_agent_move(self.agent, &mut session.history, &session.board) {
            Ok(candidate) => match session.board.apply(candidate) {
                Ok(()) => {
                    let played = format_coordinate(candidate);
                    info!("agent played {played}");
                    observer.notice(&format!("agent played {played}"));
                    return TurnFlow::Committed;
                }
                Err(illegal) => format!("agent proposed a move but {illegal}"),
            },
            Err(e) => format!("agent failed: {e}"),
        };
        warn!("{reason}; escalating to the engine fallback");
        self.fallback_turn(session, observer, &reason)
    }

    fn fallback_turn(
        &self,
        session: &mut GameSession,
        observer: &mut dyn BoardObserver,
        reason: &str,
    ) -> TurnFlow {
        let mv = match self
            .fallback
            .best_move(&session.board, session.config.search_depth)
        {
            Ok(mv) => mv,
            Err(e) => {
                error!("engine fallback failed: {e}");
                return TurnFlow::Stop(SessionEvent::EngineFailed(e));
            }
        };
        if let Err(illegal) = session.board.apply(mv) {
            error!("engine fallback returned an unusable move: {illegal}");
            return TurnFlow::Stop(SessionEvent::EngineFailed(EngineError::Protocol(
                illegal.to_string(),
            )));
        }

        let played = format_coordinate(mv);
        // The substitute is not an agent decision: it goes into the log as
        // a system marker, never as an assistant message.
        let marker = format!("The engine fallback played {played} on the agent's behalf.");
        if let Err(e) = session.history.append(Message::System { text: marker }) {
            warn!("conversation log rejected the fallback marker: {e}");
        }

        info!("engine fallback played {played}");
        observer.notice(&format!("{reason}; engine played {played}"));
        TurnFlow::Committed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::agent::{AgentError, AgentReply};
    use crate::engine::testing::{FirstLegalFallback, UnavailableFallback};

    struct ScriptedInput(VecDeque<HumanAction>);

    impl ScriptedInput {
        fn moves(moves: &[&str]) -> Self {
            ScriptedInput(
                moves
                    .iter()
                    .map(|m| HumanAction::Move(m.to_string()))
                    .collect(),
            )
        }
    }

    impl HumanInput for ScriptedInput {
        fn read_action(&mut self, _board: &GameBoard) -> HumanAction {
            self.0.pop_front().unwrap_or(HumanAction::Quit)
        }
    }

    #[derive(Default)]
    struct Recording {
        notices: Vec<String>,
        shows: usize,
    }

    impl BoardObserver for Recording {
        fn show(&mut self, _board: &GameBoard) {
            self.shows += 1;
        }
        fn notice(&mut self, text: &str) {
            self.notices.push(text.to_string());
        }
    }

    fn session(human_color: Color) -> GameSession {
        GameSession::new(GameConfig::new(human_color, 3).expect("depth 3 is valid"))
    }

    fn no_agent() -> ScriptedAgent {
        ScriptedAgent::new(vec![])
    }

    #[test]
    fn depth_outside_range_is_rejected() {
        assert!(GameConfig::new(Color::White, 2).is_err());
        assert!(GameConfig::new(Color::White, 51).is_err());
        assert!(GameConfig::new(Color::White, 3).is_ok());
        assert!(GameConfig::new(Color::White, 50).is_ok());
    }

    /// Scenario 1: human plays White, enters e2e4 on the initial board.
    /// The move commits and the side to move becomes Black.
    #[test]
    fn legal_human_move_commits() {
        let agent = no_agent();
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::White);
        let mut input = ScriptedInput::moves(&["e2e4"]);
        let mut observer = Recording::default();

        let flow = arbitrator.human_turn(&mut session, &mut input, &mut observer);
        assert!(matches!(flow, TurnFlow::Committed));
        assert_eq!(session.board.side_to_move(), Color::Black);
        assert!(session.board.fen().contains("4P3"), "the e-pawn moved");
        assert!(observer.notices.is_empty());
    }

    /// Scenario 4: malformed human input re-prompts without touching the
    /// board, and the same player stays on turn.
    #[test]
    fn malformed_human_input_reprompts_without_mutation() {
        let agent = no_agent();
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::White);
        let before = session.board.fen();
        let mut input = ScriptedInput(VecDeque::from([
            HumanAction::Move("xyz".to_string()),
            HumanAction::NewSession,
        ]));
        let mut observer = Recording::default();

        let flow = arbitrator.human_turn(&mut session, &mut input, &mut observer);
        assert!(matches!(flow, TurnFlow::Stop(SessionEvent::ResetRequested)));
        assert_eq!(session.board.fen(), before, "no board mutation on bad input");
        assert_eq!(session.board.side_to_move(), Color::White);
        assert_eq!(observer.notices.len(), 1);
        assert!(observer.notices[0].contains("coordinate notation"));
    }

    /// An illegal human move is also recovered locally by re-prompting.
    #[test]
    fn illegal_human_move_reprompts() {
        let agent = no_agent();
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::White);
        let mut input = ScriptedInput::moves(&["e2e5", "e2e4"]);
        let mut observer = Recording::default();

        let flow = arbitrator.human_turn(&mut session, &mut input, &mut observer);
        assert!(matches!(flow, TurnFlow::Committed));
        assert_eq!(observer.notices.len(), 1);
        assert!(observer.notices[0].contains("not legal"));
        assert_eq!(session.board.side_to_move(), Color::Black);
    }

    /// Scenario 2: the agent fetches board info and answers a legal move.
    /// It commits without the fallback being consulted.
    #[test]
    fn legal_agent_move_commits_without_fallback() {
        let agent = ScriptedAgent::answering("e2e4");
        let arbitrator = Arbitrator::new(&agent, &UnavailableFallback);
        let mut session = session(Color::Black);
        let mut observer = Recording::default();

        let flow = arbitrator.agent_turn(&mut session, &mut observer);
        assert!(matches!(flow, TurnFlow::Committed));
        assert_eq!(session.board.side_to_move(), Color::Black);
        assert!(session.board.fen().contains("4P3"));
        assert!(
            session.history.snapshot().contains(&Message::AssistantProposal {
                text: "e2e4".to_string()
            }),
            "the agent's answer is part of the log"
        );
        assert_eq!(observer.notices, ["agent played e2e4"]);
    }

    /// Scenario 3: a malformed agent answer escalates to the fallback;
    /// the committed move carries no AssistantProposal, only a system
    /// marker.
    #[test]
    fn malformed_agent_answer_escalates_to_fallback() {
        let agent = ScriptedAgent::answering("z9z9");
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::Black);
        let mut observer = Recording::default();

        let flow = arbitrator.agent_turn(&mut session, &mut observer);
        assert!(matches!(flow, TurnFlow::Committed));
        assert_eq!(session.board.side_to_move(), Color::Black, "a move was committed");

        let log = session.history.snapshot();
        let marker = log
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::System { text } if text.contains("engine fallback") => Some(text),
                _ => None,
            })
            .expect("a fallback marker is recorded");
        let played = marker
            .split_whitespace()
            .find(|w| parse_coordinate(w).is_ok())
            .expect("the marker names the move");
        assert!(
            !log.iter().any(|m| matches!(
                m,
                Message::AssistantProposal { text } if text == played
            )),
            "the committed move is not an agent message"
        );
        assert_eq!(observer.notices.len(), 1);
        assert!(observer.notices[0].contains("agent failed"));
        assert!(observer.notices[0].contains("engine played"));
    }

    /// A well-formed but illegal agent candidate escalates the same way
    /// (same-turn self-contradictions get no second agent attempt).
    #[test]
    fn illegal_agent_candidate_escalates_to_fallback() {
        let agent = ScriptedAgent::answering("e2e5");
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::Black);
        let mut observer = Recording::default();

        let flow = arbitrator.agent_turn(&mut session, &mut observer);
        assert!(matches!(flow, TurnFlow::Committed));
        assert_eq!(observer.notices.len(), 1);
        assert!(observer.notices[0].contains("not legal"));
        assert!(observer.notices[0].contains("engine played"));
    }

    #[test]
    fn agent_transport_failure_escalates_to_fallback() {
        let agent = ScriptedAgent::new(vec![Err(AgentError::Transport(
            "connection refused".to_string(),
        ))]);
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::Black);
        let mut observer = Recording::default();

        let flow = arbitrator.agent_turn(&mut session, &mut observer);
        assert!(matches!(flow, TurnFlow::Committed));
        assert!(observer.notices[0].contains("agent failed"));
    }

    /// Only the fallback failing is fatal to the turn; the session stays
    /// intact so the owner can retry.
    #[test]
    fn fallback_failure_surfaces_and_leaves_the_session_intact() {
        let agent = ScriptedAgent::new(vec![Ok(AgentReply::Empty)]);
        let arbitrator = Arbitrator::new(&agent, &UnavailableFallback);
        let mut session = session(Color::Black);
        let before = session.board.fen();
        let history_len = session.history.len();
        let mut observer = Recording::default();

        let flow = arbitrator.agent_turn(&mut session, &mut observer);
        assert!(matches!(
            flow,
            TurnFlow::Stop(SessionEvent::EngineFailed(EngineError::Unavailable(_)))
        ));
        assert_eq!(session.board.fen(), before);
        // The exchange recorded its directive, but the board is unchanged
        // and the session remains usable.
        assert_eq!(session.history.len(), history_len + 1);
        assert_eq!(session.board.side_to_move(), Color::White);
    }

    /// Scenario 5: a reset discards the whole session; a fresh one shares
    /// nothing with its predecessor.
    #[test]
    fn reset_produces_a_wholly_fresh_session() {
        let agent = ScriptedAgent::answering("e2e4");
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let mut session = session(Color::Black);
        let mut input = ScriptedInput(VecDeque::from([HumanAction::NewSession]));
        let mut observer = Recording::default();

        // Agent (White) moves, then the human asks for a new session.
        let event = arbitrator.run(&mut session, &mut input, &mut observer);
        assert!(matches!(event, SessionEvent::ResetRequested));
        assert!(session.history.len() > 1, "the old log grew during play");

        let fresh = GameSession::new(session.config);
        assert_eq!(fresh.history.len(), 1, "only the system directive");
        assert!(matches!(
            fresh.history.snapshot()[0],
            Message::System { .. }
        ));
        assert_eq!(fresh.board.fen(), GameBoard::new().fen());
        assert_ne!(fresh.board.fen(), session.board.fen());
    }

    /// Full run: the game ends as soon as the board reports a terminal
    /// position, checked before the next turn begins.
    #[test]
    fn run_stops_on_checkmate() {
        let agent = no_agent();
        let arbitrator = Arbitrator::new(&agent, &FirstLegalFallback);
        let config = GameConfig::new(Color::White, 3).expect("depth 3 is valid");
        let mut session = GameSession::new(config);
        // Back-rank mate in one for White.
        session.board = GameBoard::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1")
            .expect("mate-in-one FEN parses");
        let mut input = ScriptedInput::moves(&["a1a8"]);
        let mut observer = Recording::default();

        let event = arbitrator.run(&mut session, &mut input, &mut observer);
        assert!(matches!(event, SessionEvent::GameOver(GameOutcome::WhiteWins)));
        // Shown once before the mating move and once for the final board.
        assert_eq!(observer.shows, 2);
    }
}
