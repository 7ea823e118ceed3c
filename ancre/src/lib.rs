//! # ancre
//!
//! Generalized interior references: a [`Locator`] addresses one element inside a larger heap
//! object (an array element, a field of a boxed value, a slot of a resizable buffer) and keeps
//! that object alive.
//!
//! A [`LocatorTemplate`] classifies an owner type once and then resolves the same location
//! against many owner instances. Field and high-rank array access go through accessors compiled
//! by `ancre-exec` and cached per template.
//!
//! ```
//! use ancre::{Locator, LocatorTemplate};
//! use ancre::runtime::Vector;
//!
//! let values = Vector::from_vec(vec![10u32, 20, 30]);
//! let second = LocatorTemplate::<Vector<u32>, u32>::at(1)?;
//! let locator: Locator<u32> = second.resolve(&values)?;
//! assert_eq!(locator.read()?, 20);
//! locator.write(99)?;
//! assert_eq!(values.to_vec(), vec![10, 99, 30]);
//! # Ok::<(), ancre::LocateError>(())
//! ```

// --- runtime ---
pub use ancre_exec::{BackendKind, BackendPolicy};
pub use ancre_runtime as runtime;

// --- errors ---
mod errors;
pub use errors::{ErrorLocation, LocateError, LocateErrorKind};

// --- path expressions ---
mod path;

// --- classifier ---
mod classify;
pub use classify::Mode;

// --- locator ---
mod locator;
pub use locator::{ElementRef, Locator, ReadOnlyLocator, ReadOnlyProvider, Strategy};

// --- resolution ---
mod resolve;

// --- templates ---
mod template;
pub use template::LocatorTemplate;
