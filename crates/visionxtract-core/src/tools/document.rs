use std::sync::Arc;

use serde::Serialize;

use crate::models::{CoreError, CoreResult, ExecutionContext, keys};
use crate::tools::DocumentIdSource;
use crate::tools::image_ops;

pub const MISSING_CONTENT: &str = "File content not available in context";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DocumentValidation {
    pub valid: bool,
    pub document_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentValidation {
    fn rejected(document_name: &str, error: String) -> Self {
        Self {
            valid: false,
            document_name: document_name.to_string(),
            format: None,
            size: None,
            mode: None,
            error: Some(error),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadedDocument {
    pub document_id: String,
    pub document_name: String,
    pub file_size: usize,
}

/// Validation and identifier allocation shared by the image capabilities.
#[derive(Clone)]
pub struct DocumentTools {
    document_ids: Arc<dyn DocumentIdSource>,
}

impl DocumentTools {
    pub fn new(document_ids: Arc<dyn DocumentIdSource>) -> Self {
        Self { document_ids }
    }

    /// Checks that the context's file content decodes as an image.
    pub fn validate_document(
        &self,
        context: &ExecutionContext,
        document_name: &str,
    ) -> DocumentValidation {
        let Some(content) = context.bytes(keys::FILE_CONTENT).filter(|bytes| !bytes.is_empty())
        else {
            return DocumentValidation::rejected(document_name, MISSING_CONTENT.to_string());
        };

        match image_ops::inspect(content) {
            Ok(info) => DocumentValidation {
                valid: true,
                document_name: document_name.to_string(),
                format: Some(info.format),
                size: Some((info.width, info.height)),
                mode: Some(info.mode),
                error: None,
            },
            Err(error) => DocumentValidation::rejected(document_name, error.message),
        }
    }

    /// Allocates a document id and records it in the context.
    pub fn upload_document(
        &self,
        context: &mut ExecutionContext,
        document_name: &str,
    ) -> CoreResult<UploadedDocument> {
        let file_size = context
            .bytes(keys::FILE_CONTENT)
            .filter(|bytes| !bytes.is_empty())
            .map(<[u8]>::len)
            .ok_or_else(|| CoreError::invalid_input(MISSING_CONTENT))?;

        let document_id = self.document_ids.allocate(document_name);
        context.insert_json(keys::DOCUMENT_ID, document_id.clone());

        Ok(UploadedDocument {
            document_id,
            document_name: document_name.to_string(),
            file_size,
        })
    }
}
