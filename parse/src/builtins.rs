//! Built-in allowlists the parsers and resolver consult so primitives and
//! standard-library calls don't pollute `uses_type`/`calls` edges or turn
//! into spurious unresolved references (§4.4, §4.5 tier 1).

/// Node.js built-in module names (with or without the `node:` prefix and
/// any subpath). Import specifiers matching these are skipped entirely,
/// never emitted as unresolved references.
pub const NODE_BUILTIN_MODULES: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dgram", "dns", "events", "fs",
    "http", "http2", "https", "net", "os", "path", "perf_hooks", "process", "punycode", "querystring",
    "readline", "stream", "string_decoder", "timers", "tls", "tty", "url", "util", "v8", "vm",
    "worker_threads", "zlib", "module", "repl", "inspector", "async_hooks",
];

pub fn is_node_builtin(specifier: &str) -> bool {
    let stripped = specifier.strip_prefix("node:").unwrap_or(specifier);
    let module = stripped.split('/').next().unwrap_or(stripped);
    NODE_BUILTIN_MODULES.contains(&module)
}

/// Whether a Go import path is part of the standard library: its first path
/// segment contains no dot (§4.5 tier 1).
pub fn is_go_stdlib(specifier: &str) -> bool {
    let first_segment = specifier.split('/').next().unwrap_or(specifier);
    !first_segment.contains('.')
}

/// TS/JS built-in type identifiers excluded from `uses_type` edges (§4.4).
pub const TS_BUILTIN_TYPES: &[&str] = &[
    "string", "number", "boolean", "void", "any", "unknown", "never", "object", "symbol",
    "bigint", "undefined", "null", "Array", "Promise", "Map", "Set", "Record", "Partial",
    "Readonly", "Pick", "Omit", "Date", "Error", "RegExp", "Function", "this",
];

pub fn is_ts_builtin_type(name: &str) -> bool {
    TS_BUILTIN_TYPES.contains(&name)
}

/// Go built-in type identifiers excluded from `uses_type` edges.
pub const GO_BUILTIN_TYPES: &[&str] = &[
    "string", "bool", "int", "int8", "int16", "int32", "int64", "uint", "uint8", "uint16",
    "uint32", "uint64", "uintptr", "byte", "rune", "float32", "float64", "complex64",
    "complex128", "error", "any",
];

pub fn is_go_builtin_type(name: &str) -> bool {
    GO_BUILTIN_TYPES.contains(&name)
}

/// Method names on built-in prototypes (`Array`, `String`, etc.) that must
/// never be bound to a user-defined function of the same name during tier-3
/// global name-lookup call resolution (§4.4 call-resolution helper).
pub const BUILTIN_METHOD_DENYLIST: &[&str] = &[
    "split", "join", "map", "filter", "reduce", "forEach", "push", "pop", "shift", "unshift",
    "slice", "splice", "concat", "includes", "indexOf", "find", "findIndex", "sort", "reverse",
    "toString", "valueOf", "hasOwnProperty", "replace", "replaceAll", "trim", "toLowerCase",
    "toUpperCase", "charAt", "substring", "then", "catch", "finally", "keys", "values", "entries",
];

pub fn is_denylisted_method(name: &str) -> bool {
    BUILTIN_METHOD_DENYLIST.contains(&name)
}
