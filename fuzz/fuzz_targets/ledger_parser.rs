#![no_main]

use benchledger::store::LedgerFormat;
use benchledger::validate::{validate, RawRun};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Neither decoding a ledger nor validating a payload may panic
        let _ = LedgerFormat::DataJs.decode(input);
        let _ = LedgerFormat::Json.decode(input);
        if let Ok(raw) = RawRun::from_json(input) {
            let _ = validate("fuzz", &raw);
        }
    }
});
