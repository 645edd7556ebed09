use serde::{Deserialize, Serialize};

use crate::error::PreviewError;

/// One referenced page inside a document, with the highlight labels the
/// assistant attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEntry {
    #[serde(alias = "page_number")]
    pub page_number: u32,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// All pages of a single document referenced by one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    #[serde(alias = "document_name")]
    pub document_name: String,
    #[serde(default)]
    pub pages: Vec<PageEntry>,
}

/// The payload emitted when the user activates a page reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    pub document_name: String,
    pub page_number: u32,
    pub highlights: Vec<String>,
}

/// Read-only mapping from an assistant reply to its page references.
///
/// Built once per reply and owned by the transcript entry that produced it.
/// Consumers render one activation control per [`PageEntry`] and forward the
/// resulting [`NavigationIntent`] to the viewer; the index itself never
/// navigates.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    references: Vec<DocumentReference>,
}

// The backend wraps references in its full chat response; the index accepts
// the envelope as well as a bare reference array.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyEnvelope {
    #[serde(default, alias = "page_references")]
    page_references: Vec<DocumentReference>,
}

impl ReferenceIndex {
    /// Parse the references carried by an assistant reply.
    ///
    /// `reply` may be the backend's whole chat-response object or just its
    /// reference array. Entries with a page number below 1 are rejected.
    pub fn from_reply(reply: &str) -> Result<Self, PreviewError> {
        let references = match serde_json::from_str::<ReplyEnvelope>(reply) {
            Ok(envelope) => envelope.page_references,
            Err(_) => serde_json::from_str::<Vec<DocumentReference>>(reply).map_err(|err| {
                PreviewError::parse(format!("invalid page reference payload: {err}"))
            })?,
        };

        for reference in &references {
            if let Some(entry) = reference.pages.iter().find(|p| p.page_number < 1) {
                return Err(PreviewError::parse(format!(
                    "document {:?} references page {}, but pages are numbered from 1",
                    reference.document_name, entry.page_number
                )));
            }
        }

        Ok(Self { references })
    }

    #[must_use]
    pub fn references(&self) -> &[DocumentReference] {
        &self.references
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.references.iter().all(|r| r.pages.is_empty())
    }

    /// One navigation intent per referenced page, in reply order.
    pub fn intents(&self) -> impl Iterator<Item = NavigationIntent> + '_ {
        self.references.iter().flat_map(|reference| {
            reference.pages.iter().map(move |entry| NavigationIntent {
                document_name: reference.document_name.clone(),
                page_number: entry.page_number,
                highlights: entry.highlights.clone(),
            })
        })
    }

    #[must_use]
    pub fn first(&self) -> Option<NavigationIntent> {
        self.intents().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_envelope() {
        let reply = r#"{
            "response": "See the design chapter.",
            "sources": [],
            "pageReferences": [
                {
                    "documentName": "Spec.pdf",
                    "pages": [
                        {"pageNumber": 3, "highlights": ["capacity limits"]},
                        {"pageNumber": 7}
                    ]
                }
            ]
        }"#;

        let index = ReferenceIndex::from_reply(reply).unwrap();
        let intents: Vec<_> = index.intents().collect();
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].document_name, "Spec.pdf");
        assert_eq!(intents[0].page_number, 3);
        assert_eq!(intents[0].highlights, vec!["capacity limits".to_string()]);
        assert_eq!(intents[1].page_number, 7);
        assert!(intents[1].highlights.is_empty());
    }

    #[test]
    fn parses_snake_case_envelope() {
        let reply = r#"{
            "page_references": [
                {"document_name": "Spec.pdf", "pages": [{"page_number": 2}]}
            ]
        }"#;

        let index = ReferenceIndex::from_reply(reply).unwrap();
        assert_eq!(index.first().unwrap().page_number, 2);
    }

    #[test]
    fn parses_bare_reference_array() {
        let reply = r#"[{"documentName": "A.pdf", "pages": [{"pageNumber": 1}]}]"#;
        let index = ReferenceIndex::from_reply(reply).unwrap();
        assert_eq!(index.references().len(), 1);
    }

    #[test]
    fn rejects_page_zero() {
        let reply = r#"[{"documentName": "A.pdf", "pages": [{"pageNumber": 0}]}]"#;
        let err = ReferenceIndex::from_reply(reply).unwrap_err();
        assert!(matches!(err, PreviewError::Parse { .. }));
    }

    #[test]
    fn reply_without_references_is_empty() {
        let index = ReferenceIndex::from_reply(r#"{"response": "no citations"}"#).unwrap();
        assert!(index.is_empty());
        assert!(index.first().is_none());
    }

    #[test]
    fn rejects_non_reference_payload() {
        let err = ReferenceIndex::from_reply("not json").unwrap_err();
        assert!(matches!(err, PreviewError::Parse { .. }));
    }
}
