use chess::ChessMove;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::agent::{AgentError, AgentReply, AgentRequest, AgentTransport, CapabilityDecl};
use crate::board::GameBoard;
use crate::history::{ConversationHistory, HistoryError, Message};
use crate::moves::{parse_coordinate, format_coordinate, MalformedMove};

pub const CAPABILITY_NAME: &str = "get_board_info";

const TURN_DIRECTIVE: &str =
    "It is your move. Fetch the board information you need, then answer with your move.";

/// Declaration of the single capability offered to the agent: no inputs,
/// returns the current position and the legal moves.
pub fn board_info_capability() -> CapabilityDecl {
    CapabilityDecl {
        name: CAPABILITY_NAME.to_string(),
        description: "Returns the board position in FEN and the legal moves in UCI \
                      coordinate notation, as JSON."
            .to_string(),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

/// Payload of the board-info capability. Computed from the live board at
/// request time; the position changes every turn, so it is never cached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub fen: String,
    pub legal_moves: Vec<String>,
}

pub fn board_info(board: &GameBoard) -> BoardInfo {
    BoardInfo {
        fen: board.fen(),
        legal_moves: board
            .legal_moves()
            .into_iter()
            .map(format_coordinate)
            .collect(),
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("agent produced no usable move")]
    NoMoveProduced,
    #[error(transparent)]
    Malformed(#[from] MalformedMove),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("conversation log rejected a message: {0}")]
    History(#[from] HistoryError),
}

/// Run one two-phase capability exchange and return the agent's candidate
/// move.
///
/// The first call of a turn forces capability use. If the agent invokes
/// it, the request and the freshly computed result are appended to the
/// log and the agent is asked again, this time expecting a free-form
/// answer. The answer is trimmed, lowercased, recorded as an
/// `AssistantProposal` and parsed as coordinate notation. The log growth
/// is required behavior: the transmitted history is the agent's only
/// state.
///
/// The caller still validates the returned candidate against the board;
/// syntax is all that is checked here.
pub fn request_agent_move(
    agent: &dyn AgentTransport,
    history: &mut ConversationHistory,
    board: &GameBoard,
) -> Result<ChessMove, ProtocolError> {
    let capability = board_info_capability();
    history.append(Message::UserDirective {
        text: TURN_DIRECTIVE.to_string(),
    })?;

    let reply = agent.request(&AgentRequest {
        messages: history.snapshot(),
        capability: &capability,
        force_capability: true,
    })?;

    let reply = match reply {
        AgentReply::CapabilityCall { id } => {
            let info = board_info(board);
            debug!(
                "{CAPABILITY_NAME} invoked (id {id}): {} legal moves",
                info.legal_moves.len()
            );
            history.append(Message::CapabilityRequest {
                id: id.clone(),
                capability: CAPABILITY_NAME.to_string(),
            })?;
            history.append(Message::CapabilityResult { id, info })?;

            // Second call of the turn: the capability is no longer
            // forced, a final answer is expected now.
            agent.request(&AgentRequest {
                messages: history.snapshot(),
                capability: &capability,
                force_capability: false,
            })?
        }
        // A direct answer on the first call is accepted as the final
        // text even though the capability was forced.
        other => other,
    };

    let text = match reply {
        AgentReply::Answer(text) => text,
        AgentReply::CapabilityCall { .. } | AgentReply::Empty => {
            return Err(ProtocolError::NoMoveProduced)
        }
    };

    let text = text.trim().to_lowercase();
    history.append(Message::AssistantProposal { text: text.clone() })?;
    Ok(parse_coordinate(&text)?)
}
