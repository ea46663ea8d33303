//! Jupyter notebook reading for nbreplay.
//!
//! Turns an `.ipynb` file into the [`nbreplay_core::Notebook`] a replay runs on.
//!
//! ```text
//! demo.ipynb ─────► JupyterNotebook ─────► Notebook "ipynb.demo"
//!                  (nbformat 4 only)        (cells + stored outputs)
//! ```

mod error;
mod ipynb;

pub use error::{IpynbError, IpynbResult};
pub use ipynb::{JupyterCell, JupyterNotebook, JupyterOutput, MultilineText, SUPPORTED_NBFORMAT};

use std::path::Path;

use nbreplay_core::Notebook;

/// Read the notebook at `path`, named after its file.
pub fn load_notebook(path: impl AsRef<Path>) -> IpynbResult<Notebook> {
    let path = path.as_ref();
    let notebook = JupyterNotebook::read_from_file(path)?;
    tracing::debug!(
        "Read {} cells from {}",
        notebook.cells.len(),
        path.display()
    );
    Ok(notebook.into_notebook(notebook_name(path)))
}

/// Name used as the prefix of cell labels: `<extension>.<stem>`, with spaces
/// in the stem replaced by underscores.
pub fn notebook_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(' ', "_"))
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}.{}", ext.to_string_lossy(), stem),
        None => stem,
    }
}
