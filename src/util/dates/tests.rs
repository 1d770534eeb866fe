use chrono::TimeZone;

use super::*;

#[test]
fn mts_round_trips_through_datetime() {
    let time = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let mts = time.as_mts();

    assert_eq!(mts, 1_717_228_800_000);
    assert_eq!(mts.to_datetime(), time);
}

#[test]
fn out_of_range_mts_saturates() {
    assert_eq!(i64::MAX.to_datetime(), DateTime::<Utc>::MAX_UTC);
    assert_eq!(i64::MIN.to_datetime(), DateTime::<Utc>::MIN_UTC);
}

#[test]
fn formatted_mts_keeps_the_raw_value() {
    assert!(1_717_228_800_000_i64.format_mts().starts_with("1717228800000 ("));
}
