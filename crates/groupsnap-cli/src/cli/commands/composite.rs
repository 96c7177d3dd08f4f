use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use groupsnap_core::config::CompositorConfig;
use groupsnap_core::images::composite;
use groupsnap_core::images::path_mime::read_inline_image;

pub fn run(inputs: &[PathBuf], output: &Path, options: CompositorConfig) -> Result<()> {
    let images = inputs
        .iter()
        .map(|path| read_inline_image(path))
        .collect::<Result<Vec<_>>>()?;

    let result = composite(images, options).context("composite images")?;
    fs::write(output, result.image.bytes())
        .with_context(|| format!("write {}", output.display()))?;

    match result.layout {
        Some(layout) => println!(
            "Wrote {} ({}x{}, {} images)",
            output.display(),
            layout.width,
            layout.height,
            result.image_count
        ),
        None => println!("Wrote {} (1 image, unchanged)", output.display()),
    }
    Ok(())
}
