#![no_main]
use libfuzzer_sys::fuzz_target;
use supply_core::{Profile, ProfileKind, TextEntry};

fuzz_target!(|input: (bool, &str, &[u8])| {
    let (pairs, run_time, body) = input;
    let kind = if pairs {
        ProfileKind::OrderedPairs
    } else {
        ProfileKind::EvenlySpaced
    };
    let Ok(mut profile) = Profile::from_reader(body, kind, TextEntry::from(run_time)) else {
        return;
    };
    let n = profile.len();
    assert!(n > 0);
    assert!((0..n).all(|i| (0.0..=1.0).contains(&profile.progress_at(i))));
    if let Ok(iter) = profile.iter() {
        assert_eq!(iter.count(), n);
    }
});
