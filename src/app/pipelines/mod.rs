pub mod describe_pipeline;
pub mod token_pipeline;

use crate::core::Storage;
use crate::domain::model::SourceDocument;
use crate::utils::error::Result;
use std::path::Path;

pub const MANIFEST_EXTENSION: &str = "json";

/// Read every manifest in the input directory. A file that cannot be read or
/// is not UTF-8 still yields a document, carrying the reason instead of text.
pub(crate) async fn read_documents<S: Storage>(
    storage: &S,
    input_dir: &str,
) -> Result<Vec<SourceDocument>> {
    let names = storage.list_files(MANIFEST_EXTENSION).await?;
    let mut documents = Vec::with_capacity(names.len());

    for name in names {
        let path = Path::new(input_dir).join(&name).display().to_string();
        let content = match storage.read_file(&name).await {
            Ok(bytes) => String::from_utf8(bytes).map_err(|e| format!("not valid UTF-8: {}", e)),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = &content {
            tracing::warn!("⚠️ Could not read {}: {}", path, reason);
        }
        documents.push(SourceDocument { path, content });
    }

    Ok(documents)
}

pub(crate) fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
