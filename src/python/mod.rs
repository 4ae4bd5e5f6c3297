mod bindings;

use crate::core::CL100K_BASE_PATTERN;
pub use bindings::{count_tokens, PyTokenizer};

use pyo3::prelude::*;

/// tallytok - cl100k_base BPE tokenizer with Python bindings
///
/// Token ids and counts match the cl100k_base vocabulary used by GPT-4 and
/// GPT-3.5-turbo. Batch calls run on Rayon.
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTokenizer>()?;
    m.add_function(wrap_pyfunction!(count_tokens, m)?)?;
    m.add("CL100K_BASE_PATTERN", CL100K_BASE_PATTERN)?;
    Ok(())
}
