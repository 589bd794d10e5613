#![no_main]

use libfuzzer_sys::fuzz_target;
use triage_core::{Fingerprint, JobIdentity};
use triage_issues::{
    append_fingerprint_marker, append_job_identity_marker, extract_fingerprint_markers,
    issue_carries_fingerprint, issue_carries_job_identity,
};

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data);
    let _ = extract_fingerprint_markers(&body);

    let (Some(fingerprint), Some(identity)) = (
        Fingerprint::from_token("fp-0123456789ab"),
        JobIdentity::from_token("job-0123456789ab"),
    ) else {
        return;
    };
    let marked = append_job_identity_marker(
        &append_fingerprint_marker(&body, &fingerprint),
        &identity,
    );
    assert!(issue_carries_fingerprint("", Some(&marked), &fingerprint));
    assert!(issue_carries_job_identity(Some(&marked), &identity));
    assert_eq!(append_fingerprint_marker(&marked, &fingerprint), marked);
});
