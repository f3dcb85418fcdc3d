//! Canned search tool for tests and offline runs.

use async_trait::async_trait;

use crate::domain::ports::{SearchHit, SearchTool, ToolError};

pub struct MockSearchTool {
    name: String,
    hits: Vec<SearchHit>,
    fail: bool,
}

impl MockSearchTool {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            name: "mock_search".to_string(),
            hits,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            name: "mock_search".to_string(),
            hits: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SearchTool for MockSearchTool {
    fn tool_name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        if self.fail {
            return Err(ToolError::Failed(format!("mock failure for {query}")));
        }
        Ok(self.hits.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_hits() {
        let tool = MockSearchTool::with_hits(vec![SearchHit {
            title: "住宅收纳设计标准".into(),
            url: "https://example.com/storage".into(),
            snippet: "收纳面积占比建议 12%".into(),
            relevance_score: 0.9,
        }]);
        let hits = tool.search("收纳标准").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(tool.tool_name(), "mock_search");
    }
}
