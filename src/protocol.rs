//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Chat, ChatType, InviteCode, Message, MessageType, TaskType, User, UserTask, UserTaskStatus};
use crate::problem_bank::{GeolinKey, ProblemRequest, ProblemStep, Solution};

/// Messages the client can send over the chat WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    PostMessage {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        text: String,
    },
}

/// Messages the server sends back over the chat WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Chunk {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        text: String,
    },
    Done {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        reply: String,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

//
// Auth
//

#[derive(Deserialize)]
pub struct LoginIn {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoginQuery {
    #[serde(default)]
    pub use_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOut {
    pub token: String,
    pub token_type: String,
}

#[derive(Serialize)]
pub struct MeOut {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
}

//
// Chats
//

#[derive(Deserialize)]
pub struct CreateChatIn {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProblemChatIn {
    #[serde(default)]
    pub name: Option<String>,
    pub problem_id: String,
    #[serde(default)]
    pub task_type: TaskType,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOut {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub task_type: Option<TaskType>,
    pub created_at: DateTime<Utc>,
}

impl ChatOut {
    pub fn new(chat: Chat, task_type: Option<TaskType>) -> Self {
        Self { id: chat.id, name: chat.name, chat_type: chat.chat_type, task_type, created_at: chat.created_at }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOut {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub text: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageOut {
    fn from(m: Message) -> Self {
        Self { id: m.id, chat_id: m.chat_id, text: m.text, message_type: m.message_type, created_at: m.created_at }
    }
}

#[derive(Deserialize)]
pub struct PostMessageIn {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyOut {
    pub reply: String,
}

//
// Tasks
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksQuery {
    #[serde(default)]
    pub task_type: TaskType,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskIn {
    #[serde(default)]
    pub chat_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTaskOut {
    pub id: Uuid,
    pub problem_id: String,
    pub display_name: String,
    pub task_type: TaskType,
    pub status: UserTaskStatus,
    pub associated_chat_id: Option<Uuid>,
}

impl From<UserTask> for UserTaskOut {
    fn from(t: UserTask) -> Self {
        Self {
            id: t.id,
            problem_id: t.problem_id,
            display_name: t.display_name,
            task_type: t.task_type,
            status: t.status,
            associated_chat_id: t.associated_chat_id,
        }
    }
}

//
// Problem generator proxy
//

#[derive(Debug, Deserialize)]
pub struct ProblemDataQuery {
    #[serde(default)]
    pub prefix: String,
    pub seed: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDataOut {
    pub name: String,
    pub hash: String,
    pub condition: String,
    pub seed: i64,
    pub problem_params: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerIn {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub answer_attempt: String,
    pub seed: Option<i64>,
    pub problem_params: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerOut {
    pub is_correct: bool,
    pub message: String,
    pub hash: String,
    pub answer_attempt: String,
    pub seed: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerErrorOut {
    pub error: String,
    pub hash: String,
    pub answer_attempt: String,
    pub seed: Option<i64>,
}

//
// Problem bank proxy
//

#[derive(Deserialize, Default)]
pub struct GeolinKeyIn {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub seed: i64,
}

#[derive(Deserialize)]
pub struct StepIn {
    #[serde(default)]
    pub order: i32,
}

#[derive(Deserialize, Default)]
pub struct SolutionIn {
    #[serde(default)]
    pub steps: Vec<StepIn>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProblemIn {
    #[serde(default)]
    pub statement: String,
    pub geolin_ans_key: Option<GeolinKeyIn>,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub solution: SolutionIn,
}

impl CreateProblemIn {
    /// Step bodies are not accepted from clients; only their order survives.
    pub fn into_request(self, key: GeolinKeyIn) -> ProblemRequest {
        ProblemRequest {
            statement: self.statement,
            geolin_ans_key: GeolinKey { hash: key.hash, seed: key.seed },
            result: self.result,
            solution: Solution {
                steps: self.solution.steps.into_iter().map(|s| ProblemStep { order: s.order, ..ProblemStep::default() }).collect(),
            },
        }
    }
}

#[derive(Deserialize)]
pub struct ByNameQuery {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize)]
pub struct ByTypeQuery {
    #[serde(default, rename = "type")]
    pub type_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateIn {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub problem_hash: String,
    #[serde(default)]
    pub count: i64,
}

//
// One-shot model calls
//

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIn {
    #[serde(default)]
    pub problem_description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SolveOut {
    pub solution: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractIn {
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default)]
    pub solution: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOut {
    pub extracted_answer: String,
}

//
// Admin
//

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteIn {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub max_usages: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteOut {
    pub id: Uuid,
    pub code: String,
    pub max_usages: u32,
    pub current_usages: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&InviteCode> for InviteOut {
    fn from(ic: &InviteCode) -> Self {
        Self {
            id: ic.id,
            code: ic.code.clone(),
            max_usages: ic.max_usages,
            current_usages: ic.current_usages,
            created_at: ic.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub email: String,
}

impl From<&User> for UserRef {
    fn from(u: &User) -> Self {
        Self { id: u.id.clone(), email: u.email.clone() }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteListItem {
    #[serde(flatten)]
    pub invite: InviteOut,
    pub created_by: Option<UserRef>,
    pub used_by: Vec<UserRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedInviteOut {
    pub id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserOut {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub student_group: String,
    pub roles: Vec<String>,
    pub used_invite_code: Option<UsedInviteOut>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteQuery {
    #[serde(default)]
    pub user_id: String,
}
