use std::io;
use std::path::{Path, PathBuf};

/// Allocates `<user_dir>/users/<user_id>/images/<uuid>.png`, drawing new
/// UUIDs until the path is free. The images directory is created on demand.
///
/// `user_id` is joined as is; callers pass ids already checked to be a single
/// path component by `GenerationRequest::from_json`.
pub fn user_image_path(user_dir: &Path, user_id: &str) -> io::Result<PathBuf> {
    let images_dir = user_dir.join("users").join(user_id).join("images");
    std::fs::create_dir_all(&images_dir)?;

    loop {
        let path = images_dir.join(format!("{}.png", uuid::Uuid::new_v4()));
        if !path.try_exists()? {
            return Ok(path);
        }
    }
}
