use crate::framing::message_code::{
    ASSOCIATE_FILE, ERROR, FIRST_APPLICATION_CODE, KEEP_ALIVE, LIST_KEYS, QUERY_KEY_STATUS,
    REQUEST_KEY, UNRECOGNIZED, is_reserved,
};

#[test]
fn given_core_codes_when_checked_then_only_protocol_codes_are_reserved() {
    // GIVEN/WHEN/THEN: Protocol codes are reserved, application codes are not
    for code in [KEEP_ALIVE, UNRECOGNIZED, ERROR, FIRST_APPLICATION_CODE - 1] {
        assert!(is_reserved(code), "{code} should be reserved");
    }
    for code in [QUERY_KEY_STATUS, ASSOCIATE_FILE, REQUEST_KEY, LIST_KEYS, 1_000] {
        assert!(!is_reserved(code), "{code} should not be reserved");
    }
}
