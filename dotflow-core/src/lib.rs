//! Dotflow Core
//!
//! This crate provides a fine-grained reactive cell engine. It implements:
//!
//! - Reactive cells with automatic dependency tracking
//! - Revision-based propagation with deferred or synchronous scheduling
//! - Listener notification, batching and interactive setup/teardown hooks
//! - Derived operators (map, filter, throttle, combine, array filtering)
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, dependency tracking, the runtime and executors
//! - `graph`: Dependency graph nodes and the propagation queue
//! - `operators`: Cells derived from other cells
//! - `config`: Engine configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```
//! use dotflow_core::reactive::{Cell, Runtime};
//!
//! let a = Cell::new(4);
//! let b = {
//!     let a = a.clone();
//!     Cell::computed(move || Ok(a.read()? * a.read()?))
//! };
//! let c = {
//!     let (a, b) = (a.clone(), b.clone());
//!     Cell::computed(move || Ok(a.read()? + b.read()?))
//! };
//! assert_eq!(c.read().unwrap(), 20);
//!
//! a.write(2).unwrap();
//! Runtime::flush().unwrap();
//! assert_eq!(c.read().unwrap(), 6);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod operators;
pub mod reactive;

#[cfg(feature = "python")]
mod python;

pub use config::{EngineConfig, ExecutorKind, SchedulingMode};
pub use error::{CellError, ConfigError};
pub use operators::{memo_fn, CellInput, MemoFn};
pub use reactive::{Cell, CellOptions, Runtime, Stream};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module.
/// It registers all Python-exposed types and functions.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PyReactiveCell>()?;
    m.add_function(wrap_pyfunction!(python::flush, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
