#![no_main]

use libfuzzer_sys::fuzz_target;
use triage_core::{compute_fingerprint, Category, Fingerprint, RunContext};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mut fields = raw.split('|');
    let mut next = || fields.next().unwrap_or_default().to_string();
    let context = RunContext {
        repository_owner: next(),
        repository_name: next(),
        workflow_name: next(),
        job_name: next(),
        run_identifier: next(),
        error_signatures: fields.map(ToOwned::to_owned).collect(),
        ..RunContext::default()
    };
    let category = Category::general();
    let fingerprint = compute_fingerprint(&context, &category);
    assert_eq!(Fingerprint::from_token(fingerprint.as_str()), Some(fingerprint.clone()));

    let rerun = RunContext {
        run_identifier: "other-run".to_string(),
        ..context.clone()
    };
    assert_eq!(compute_fingerprint(&rerun, &category), fingerprint);
});
