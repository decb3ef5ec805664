use crate::llm::models::ChatMessage;

/// Builds the chat-completions message list for one question.
pub struct PromptBuilder<'a> {
    schema: &'a str,
    max_history_length: usize,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(schema: &'a str, max_history_length: usize) -> Self {
        Self {
            schema,
            max_history_length,
        }
    }

    pub fn build_system_message(&self) -> ChatMessage {
        ChatMessage::system(format!(
            r#"You are a specialized SQL assistant that helps users interact with a SQLite database. Your task is to convert natural language questions into correct SQL queries.

{}
### Instructions:
1. Always respond with a valid SQLite SQL query that answers the user's question
2. Always place your SQL query inside triple backticks with the sql language tag like this: ```sql
3. Always add a brief explanation of what the query does and any important SQL concepts used
4. Be precise and use only tables and columns that exist in the schema
5. Format SQL using proper indentation and line breaks for readability
6. You MUST include the SQL query in your response

### Example response format:
```sql
SELECT column_name FROM table_name WHERE condition;
```

This query [explanation of what the query does]. It uses [mention any important SQL concepts].
"#,
            self.schema
        ))
    }

    /// System message, then the most recent history, then the question.
    ///
    /// `history` is an alternating user/assistant transcript; only the last
    /// `max_history_length` turns (two messages each) are kept.
    pub fn build_messages(&self, question: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let window = self.max_history_length * 2;
        let skip = history.len().saturating_sub(window);

        let mut messages = Vec::with_capacity(window + 2);
        messages.push(self.build_system_message());
        messages.extend(history[skip..].iter().cloned());
        messages.push(ChatMessage::user(question));
        messages
    }
}
