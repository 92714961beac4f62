//! Python Bindings
//!
//! Exposes cells over arbitrary Python objects. Change detection compares
//! object identity, so writing the same object again does not notify, while
//! writing an equal but distinct object does.

use std::cell::RefCell;
use std::collections::HashMap;

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;

use crate::error::CellError;
use crate::reactive::{Cell, CellOptions, ListenerId, Runtime};

/// A Python object stored in a cell.
pub struct PyValue(PyObject);

impl Clone for PyValue {
    fn clone(&self) -> Self {
        Python::with_gil(|py| PyValue(self.0.clone_ref(py)))
    }
}

impl PartialEq for PyValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ptr() == other.0.as_ptr()
    }
}

fn to_py_err(error: CellError) -> PyErr {
    PyRuntimeError::new_err(error.to_string())
}

/// Python-exposed cell.
#[pyclass(name = "Cell", unsendable)]
pub struct PyReactiveCell {
    cell: Cell<PyValue>,
    listeners: RefCell<HashMap<u64, ListenerId>>,
}

impl PyReactiveCell {
    fn wrap(cell: Cell<PyValue>) -> Self {
        Self {
            cell,
            listeners: RefCell::new(HashMap::new()),
        }
    }
}

#[pymethods]
impl PyReactiveCell {
    /// Create a cell holding `value`.
    #[new]
    #[pyo3(signature = (value, sync = false))]
    fn new(value: PyObject, sync: bool) -> Self {
        let options = CellOptions::new().sync(sync);
        Self::wrap(Cell::with_options(PyValue(value), options))
    }

    /// Create a cell computed by calling `compute()`.
    #[staticmethod]
    #[pyo3(signature = (compute, sync = false))]
    fn computed(compute: PyObject, sync: bool) -> Self {
        let options = CellOptions::new().sync(sync);
        let cell = Cell::computed_with_options(
            move || {
                Python::with_gil(|py| {
                    compute
                        .call0(py)
                        .map(PyValue)
                        .map_err(|err| CellError::computation(err.to_string()))
                })
            },
            options,
        );
        Self::wrap(cell)
    }

    fn read(&self, py: Python<'_>) -> PyResult<PyObject> {
        let value = self.cell.read().map_err(to_py_err)?;
        Ok(value.0.clone_ref(py))
    }

    fn write(&self, value: PyObject) -> PyResult<()> {
        self.cell.write(PyValue(value)).map_err(to_py_err)?;
        Ok(())
    }

    /// Register `callback(current, previous)`. Returns a handle for
    /// `unsubscribe`.
    #[pyo3(signature = (callback, initial_call = true))]
    fn subscribe(&self, callback: PyObject, initial_call: bool) -> PyResult<u64> {
        let listener = self
            .cell
            .subscribe(
                move |current: &PyValue, previous: Option<&PyValue>| {
                    Python::with_gil(|py| {
                        let args = (
                            current.0.clone_ref(py),
                            previous.map(|value| value.0.clone_ref(py)),
                        );
                        if let Err(err) = callback.call1(py, args) {
                            tracing::warn!(error = %err, "python listener raised");
                        }
                    })
                },
                initial_call,
            )
            .map_err(to_py_err)?;

        self.listeners.borrow_mut().insert(listener.raw(), listener);
        Ok(listener.raw())
    }

    fn unsubscribe(&self, handle: u64) -> bool {
        match self.listeners.borrow_mut().remove(&handle) {
            Some(listener) => self.cell.unsubscribe(listener),
            None => false,
        }
    }

    fn dispose(&self) {
        self.listeners.borrow_mut().clear();
        self.cell.dispose();
    }

    fn force_recompute(&self) -> PyResult<()> {
        self.cell.force_recompute().map_err(to_py_err)
    }

    /// The cached value, or `None`.
    fn peek(&self, py: Python<'_>) -> Option<PyObject> {
        self.cell.peek().map(|value| value.0.clone_ref(py))
    }

    #[getter]
    fn id(&self) -> u64 {
        self.cell.id().raw()
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let repr = self
            .cell
            .peek()
            .and_then(|value| value.0.bind(py).repr().ok().map(|r| r.to_string()))
            .unwrap_or_else(|| "?".to_string());
        format!(
            "Cell(id={}, value={}, listeners={})",
            self.cell.id().raw(),
            repr,
            self.cell.listener_count()
        )
    }
}

/// Run pending propagation now.
#[pyfunction]
pub fn flush() -> PyResult<()> {
    Runtime::flush().map_err(to_py_err)
}
