use std::collections::VecDeque;

use crate::service::session::HistoryTurn;

/// System message sent with every generation call.
pub const SYSTEM_PROMPT: &str = "당신은 실내 환경(온도, 습도, CO2) 센서 데이터를 안내하는 도우미입니다. \
     한국어로 간결하고 정확하게 답하세요. 모르는 값은 추측하지 말고 모른다고 답하세요.";

/// Recent turns, oldest first. Empty when there is no history.
pub fn history_block(history: &VecDeque<HistoryTurn>) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut block = String::from("## 이전 대화 (참고용, 새 질문에 답하세요)\n");
    for turn in history {
        block.push_str(&format!("사용자: {}\n도우미: {}\n", turn.query, turn.answer));
    }
    block.push('\n');
    block
}

/// Prompt for answering from retrieved sensor documents.
pub fn build_prompt(query: &str, context: &str, history: &VecDeque<HistoryTurn>) -> String {
    format!(
        "아래 센서 데이터 문서를 근거로 질문에 답하세요. \
         문서에 없는 수치는 만들어내지 마세요.\n\n\
         ## 센서 데이터\n{context}\n\n\
         {history}\
         ## 질문\n{query}\n",
        history = history_block(history),
    )
}

/// Prompt for plain conversation without retrieved context.
pub fn build_general_prompt(query: &str, history: &VecDeque<HistoryTurn>) -> String {
    format!(
        "{history}## 질문\n{query}\n",
        history = history_block(history)
    )
}

/// Classifier prompt for the top-level route.
pub fn build_route_prompt(query: &str) -> String {
    format!(
        "Classify the user's message for an indoor air-quality assistant.\n\
         Reply with JSON only: {{\"route\":\"sensor\"}} if it asks about indoor \
         temperature, humidity, CO2, sensor readings or their statistics; \
         otherwise {{\"route\":\"general\"}}.\n\n\
         Message: {query}"
    )
}
