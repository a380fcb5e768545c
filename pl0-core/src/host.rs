//! Host-provided functions visible to compiled programs.
//!
//! `read` and `write` statements do not perform I/O themselves; each backend
//! lowers them to calls of these ambient functions, which the embedding host
//! supplies (a wasm import pair, or two script-level hooks).

/// Kind of host function, used by backends to decide how to lower a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// Returns the next input value.
    Read,
    /// Consumes one output value.
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFunction {
    /// Name the host exports it under (and the script hook name).
    pub name: &'static str,
    /// Import module for the stack-module target.
    pub module: &'static str,
    /// Number of i32 parameters.
    pub params: usize,
    /// Number of i32 results.
    pub results: usize,
    pub kind: HostKind,
}

pub const HOST_MODULE: &str = "env";

pub const HOST_FUNCTIONS: &[HostFunction] = &[
    HostFunction {
        name: "read",
        module: HOST_MODULE,
        params: 0,
        results: 1,
        kind: HostKind::Read,
    },
    HostFunction {
        name: "write",
        module: HOST_MODULE,
        params: 1,
        results: 0,
        kind: HostKind::Write,
    },
];

pub fn host_function(kind: HostKind) -> &'static HostFunction {
    match kind {
        HostKind::Read => &HOST_FUNCTIONS[0],
        HostKind::Write => &HOST_FUNCTIONS[1],
    }
}

impl HostFunction {
    /// Identifier used for the import inside a text module. Source identifiers
    /// never contain `_`, so these cannot clash with user names.
    pub fn wat_id(&self) -> String {
        format!("$__{}", self.name)
    }

    pub fn wat_import(&self) -> String {
        let mut signature = String::new();
        for _ in 0..self.params {
            signature.push_str(" (param i32)");
        }
        for _ in 0..self.results {
            signature.push_str(" (result i32)");
        }
        format!(
            "(import \"{}\" \"{}\" (func {}{}))",
            self.module,
            self.name,
            self.wat_id(),
            signature
        )
    }
}
