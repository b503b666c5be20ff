//! Well-known JSON-RPC error codes.
//!
//! Codes -32700..-32603 are the standard JSON-RPC 2.0 range. Codes
//! -32000..-32004 are the application range used by generation workers.

/// The line could not be parsed as JSON.
pub const PARSE_ERROR: i64 = -32700;

/// The request object is not a valid JSON-RPC request.
pub const INVALID_REQUEST: i64 = -32600;

/// The requested method does not exist on the worker.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// The request parameters are invalid for the method.
pub const INVALID_PARAMS: i64 = -32602;

/// The worker hit an internal error while servicing the request.
pub const INTERNAL_ERROR: i64 = -32603;

/// Generation ran but produced no usable output.
pub const GENERATION_FAILED: i64 = -32000;

/// The requested model backend is not available.
pub const MODEL_UNAVAILABLE: i64 = -32001;

/// The prompt exceeds the worker's context budget.
pub const PROMPT_TOO_LARGE: i64 = -32002;

/// The worker is shedding load.
pub const RATE_LIMITED: i64 = -32003;

/// The request was cancelled before completion.
pub const CANCELLED: i64 = -32004;

/// Returns a human-readable name for a JSON-RPC error code.
pub fn code_name(code: i64) -> &'static str {
    match code {
        PARSE_ERROR => "PARSE_ERROR",
        INVALID_REQUEST => "INVALID_REQUEST",
        METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
        INVALID_PARAMS => "INVALID_PARAMS",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        GENERATION_FAILED => "GENERATION_FAILED",
        MODEL_UNAVAILABLE => "MODEL_UNAVAILABLE",
        PROMPT_TOO_LARGE => "PROMPT_TOO_LARGE",
        RATE_LIMITED => "RATE_LIMITED",
        CANCELLED => "CANCELLED",
        -32099..=-32005 => "SERVER_ERROR",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes_have_names() {
        assert_eq!(code_name(PARSE_ERROR), "PARSE_ERROR");
        assert_eq!(code_name(METHOD_NOT_FOUND), "METHOD_NOT_FOUND");
        assert_eq!(code_name(INTERNAL_ERROR), "INTERNAL_ERROR");
    }

    #[test]
    fn application_codes_have_names() {
        assert_eq!(code_name(GENERATION_FAILED), "GENERATION_FAILED");
        assert_eq!(code_name(CANCELLED), "CANCELLED");
    }

    #[test]
    fn reserved_server_range_is_grouped() {
        assert_eq!(code_name(-32050), "SERVER_ERROR");
    }

    #[test]
    fn unknown_codes_fall_through() {
        assert_eq!(code_name(42), "UNKNOWN");
        assert_eq!(code_name(-1), "UNKNOWN");
    }
}
