//! 编排策略
//!
//! Run 引擎每一步把完整线程历史与可用工具交给策略，由策略决定结束（给出最终消息）
//! 还是发起一个或多个工具调用。把「从自然语言里选工具」这一唯一依赖模型的环节隔离在此接口后，
//! 引擎其余部分保持确定、可用脚本策略做单元测试。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::{Message, MessageContent, Role};
use crate::run::ToolCall;
use crate::tools::FALLBACK_ANSWER;

/// 策略的决定
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// 追加最终 agent 消息并结束
    Finish(MessageContent),
    /// 发起工具调用（同一步内互不依赖，可并发执行）
    CallTools(Vec<ToolCall>),
}

impl Action {
    pub fn finish(text: impl Into<String>) -> Self {
        Action::Finish(MessageContent::text(text))
    }

    pub fn call(tool: impl Into<String>, input: Value) -> Self {
        Action::CallTools(vec![ToolCall::new(tool, input)])
    }
}

/// 策略输入：一次决策所需的全部上下文
#[derive(Debug)]
pub struct PolicyInput<'a> {
    pub run_id: &'a str,
    pub history: &'a [Message],
    pub available_tools: &'a [String],
    pub instructions: &'a str,
    /// 当前步序号（从 1 开始）
    pub step: usize,
}

impl PolicyInput<'_> {
    /// 最后一条 user 消息的位置与文本
    pub fn last_user_message(&self) -> Option<(usize, &Message)> {
        self.history
            .iter()
            .enumerate()
            .rev()
            .find(|(_, m)| m.role == Role::User)
    }

    /// 最后一条 user 消息之后的工具消息
    pub fn tool_results_since_user(&self) -> Vec<&Message> {
        let start = self.last_user_message().map(|(i, _)| i + 1).unwrap_or(0);
        self.history[start..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect()
    }
}

/// 编排策略 trait（须可在多个 Run 间并发共享）
#[async_trait]
pub trait OrchestratorPolicy: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, input: &PolicyInput<'_>) -> Result<Action, String>;
}

/// 脚本策略：第 n 步返回第 n 个动作；脚本用尽时报错
pub struct ScriptedPolicy {
    actions: Vec<Action>,
}

impl ScriptedPolicy {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl OrchestratorPolicy for ScriptedPolicy {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, input: &PolicyInput<'_>) -> Result<Action, String> {
        self.actions
            .get(input.step.saturating_sub(1))
            .cloned()
            .ok_or_else(|| format!("script exhausted at step {}", input.step))
    }
}

/// 闭包策略
pub struct FnPolicy<F> {
    name: String,
    f: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&PolicyInput<'_>) -> Result<Action, String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> OrchestratorPolicy for FnPolicy<F>
where
    F: Fn(&PolicyInput<'_>) -> Result<Action, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, input: &PolicyInput<'_>) -> Result<Action, String> {
        (self.f)(input)
    }
}

/// 检索后回答：检索工具 -> 回答子代理 -> 结束
///
/// 回答工具不在可用工具中时，直接以检索到的上下文结束；上下文为空时给出兜底回答。
pub struct RetrieveThenAnswerPolicy {
    retrieval_tool: String,
    answer_tool: String,
}

impl RetrieveThenAnswerPolicy {
    pub fn new(retrieval_tool: impl Into<String>, answer_tool: impl Into<String>) -> Self {
        Self {
            retrieval_tool: retrieval_tool.into(),
            answer_tool: answer_tool.into(),
        }
    }

    fn result_of<'m>(results: &[&'m Message], tool: &str) -> Option<&'m Value> {
        results
            .iter()
            .rev()
            .find(|m| m.content.tool.as_deref() == Some(tool))
            .and_then(|m| m.content.data.as_ref())
    }
}

fn hit_ids(retrieval: &Value) -> Vec<String> {
    retrieval["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|h| h["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl OrchestratorPolicy for RetrieveThenAnswerPolicy {
    fn name(&self) -> &str {
        "retrieve_then_answer"
    }

    async fn decide(&self, input: &PolicyInput<'_>) -> Result<Action, String> {
        let (_, user) = input
            .last_user_message()
            .ok_or_else(|| "thread has no user message".to_string())?;
        let query = user.content.text.clone();
        let results = input.tool_results_since_user();

        if let Some(answer) = Self::result_of(&results, &self.answer_tool) {
            let text = answer["answer"]
                .as_str()
                .ok_or_else(|| format!("{} returned no answer field", self.answer_tool))?;
            let mut citations: Vec<String> = answer["citations"]
                .as_array()
                .map(|c| c.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            // 回答未给出引用时，引用本轮检索命中的片段
            if citations.is_empty() {
                if let Some(retrieval) = Self::result_of(&results, &self.retrieval_tool) {
                    citations = hit_ids(retrieval);
                }
            }
            return Ok(Action::Finish(
                MessageContent::text(text).with_citations(citations),
            ));
        }

        let Some(retrieval) = Self::result_of(&results, &self.retrieval_tool) else {
            return Ok(Action::call(&self.retrieval_tool, json!({ "query": query })));
        };

        let context = retrieval["context"].as_str().unwrap_or_default().to_string();
        if input.available_tools.iter().any(|t| t == &self.answer_tool) {
            return Ok(Action::call(
                &self.answer_tool,
                json!({ "query": query, "context": context }),
            ));
        }
        if context.is_empty() {
            return Ok(Action::finish(FALLBACK_ANSWER));
        }
        Ok(Action::Finish(
            MessageContent::text(context).with_citations(hit_ids(retrieval)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: MessageContent, seq: usize) -> Message {
        Message {
            role,
            content,
            seq,
            created_at: 0,
        }
    }

    fn input<'a>(history: &'a [Message], tools: &'a [String], step: usize) -> PolicyInput<'a> {
        PolicyInput {
            run_id: "run",
            history,
            available_tools: tools,
            instructions: "",
            step,
        }
    }

    #[tokio::test]
    async fn test_scripted_policy() {
        let policy = ScriptedPolicy::new(vec![Action::call("a", json!({})), Action::finish("done")]);
        let history = vec![];
        let tools = vec![];
        assert!(matches!(
            policy.decide(&input(&history, &tools, 1)).await.unwrap(),
            Action::CallTools(_)
        ));
        assert_eq!(
            policy.decide(&input(&history, &tools, 2)).await.unwrap(),
            Action::finish("done")
        );
        assert!(policy.decide(&input(&history, &tools, 3)).await.is_err());
    }

    #[tokio::test]
    async fn test_retrieve_then_answer_steps() {
        let policy = RetrieveThenAnswerPolicy::new("retrieve", "answer");
        let tools = vec!["retrieve".to_string(), "answer".to_string()];
        let mut history = vec![msg(Role::User, MessageContent::text("what is alpha?"), 0)];

        match policy.decide(&input(&history, &tools, 1)).await.unwrap() {
            Action::CallTools(calls) => {
                assert_eq!(calls[0].tool, "retrieve");
                assert_eq!(calls[0].input, json!({"query": "what is alpha?"}));
            }
            other => panic!("unexpected action: {other:?}"),
        }

        history.push(msg(
            Role::Tool,
            MessageContent::tool_result(
                "retrieve",
                json!({"context": "alpha is first", "hits": [{"id": "A"}]}),
            ),
            1,
        ));
        match policy.decide(&input(&history, &tools, 2)).await.unwrap() {
            Action::CallTools(calls) => {
                assert_eq!(calls[0].tool, "answer");
                assert_eq!(calls[0].input["context"], "alpha is first");
            }
            other => panic!("unexpected action: {other:?}"),
        }

        history.push(msg(
            Role::Tool,
            MessageContent::tool_result("answer", json!({"answer": "the first", "citations": ["A"]})),
            2,
        ));
        assert_eq!(
            policy.decide(&input(&history, &tools, 3)).await.unwrap(),
            Action::Finish(MessageContent::text("the first").with_citations(vec!["A".into()]))
        );
    }

    #[tokio::test]
    async fn test_retrieve_only_finishes_with_context() {
        let policy = RetrieveThenAnswerPolicy::new("retrieve", "answer");
        let tools = vec!["retrieve".to_string()];
        let history = vec![
            msg(Role::User, MessageContent::text("q"), 0),
            msg(
                Role::Tool,
                MessageContent::tool_result(
                    "retrieve",
                    json!({"context": "ctx", "hits": [{"id": "A"}, {"id": "B"}]}),
                ),
                1,
            ),
        ];
        assert_eq!(
            policy.decide(&input(&history, &tools, 2)).await.unwrap(),
            Action::Finish(
                MessageContent::text("ctx").with_citations(vec!["A".into(), "B".into()])
            )
        );
    }

    #[tokio::test]
    async fn test_retrieve_only_empty_context_falls_back() {
        let policy = RetrieveThenAnswerPolicy::new("retrieve", "answer");
        let tools = vec!["retrieve".to_string()];
        let history = vec![
            msg(Role::User, MessageContent::text("q"), 0),
            msg(
                Role::Tool,
                MessageContent::tool_result("retrieve", json!({"context": "", "hits": []})),
                1,
            ),
        ];
        assert_eq!(
            policy.decide(&input(&history, &tools, 2)).await.unwrap(),
            Action::finish(FALLBACK_ANSWER)
        );
    }

    #[tokio::test]
    async fn test_tool_results_scoped_to_latest_user_turn() {
        let policy = RetrieveThenAnswerPolicy::new("retrieve", "answer");
        let tools = vec!["retrieve".to_string(), "answer".to_string()];
        let history = vec![
            msg(Role::User, MessageContent::text("old"), 0),
            msg(
                Role::Tool,
                MessageContent::tool_result("answer", json!({"answer": "old answer"})),
                1,
            ),
            msg(Role::Agent, MessageContent::text("old answer"), 2),
            msg(Role::User, MessageContent::text("new"), 3),
        ];
        match policy.decide(&input(&history, &tools, 1)).await.unwrap() {
            Action::CallTools(calls) => assert_eq!(calls[0].input["query"], "new"),
            other => panic!("unexpected action: {other:?}"),
        }
    }
}
