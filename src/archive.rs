//! Zip export of a round's finished thumbnails.

use std::io::{Cursor, Write};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::{Round, SourceImage, SourceImageError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid image: {0}")]
    Image(#[from] SourceImageError),
}

/// Download name for a round's archive, derived from its prompt.
pub fn file_name(round: &Round) -> String {
    let cleaned: String = round
        .prompt
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let safe: String = cleaned.split_whitespace().collect::<Vec<_>>().join("_").chars().take(30).collect();
    format!("thumbnails_batch_{safe}.zip")
}

/// Packs every finished image of `round` as `thumbnail-<n>.<ext>`, numbered in feed order.
/// `None` when the round has nothing to download yet.
pub fn round_archive(round: &Round) -> Result<Option<Vec<u8>>, ArchiveError> {
    let images = round
        .outputs
        .iter()
        .filter_map(|o| o.output_data())
        .map(SourceImage::from_data_url)
        .collect::<Result<Vec<_>, _>>()?;
    if images.is_empty() {
        return Ok(None);
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (i, image) in images.iter().enumerate() {
        zip.start_file(format!("thumbnail-{}.{}", i + 1, image.extension()), options)?;
        zip.write_all(&image.bytes()?)?;
    }
    Ok(Some(zip.finish()?.into_inner()))
}
