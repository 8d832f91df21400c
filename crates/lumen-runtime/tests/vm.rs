//! VM integration suites

mod vm_helpers;
