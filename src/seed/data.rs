use chrono::NaiveDate;

use crate::model::{GroupingRecord, InstrumentMetadata};
use crate::store::memory::InMemoryModel;

/// Helper function to create a grouping row with instrument metadata
fn instrument(
    instrument_id: &str,
    path: [&str; 3],
    rating: Option<&str>,
    classification: &str,
    ticker: &str,
    maturity: Option<(i32, u32, u32)>,
) -> GroupingRecord {
    let [first, second, third] = path;
    GroupingRecord::new(instrument_id, first, second, third).with_metadata(InstrumentMetadata {
        rating: rating.map(str::to_string),
        classification: Some(classification.to_string()),
        ticker: Some(ticker.to_string()),
        maturity: maturity.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
    })
}

/// Demo grouping table: a small bond and equity book
pub fn demo_groupings() -> Vec<GroupingRecord> {
    vec![
        instrument(
            "BOND1001",
            ["Government", "Treasury", "US"],
            Some("AAA"),
            "Sovereign",
            "UST 4.25 2034",
            Some((2034, 11, 15)),
        ),
        instrument(
            "BOND1002",
            ["Government", "Agency", "US"],
            Some("AA+"),
            "Agency",
            "FNMA 3.5 2031",
            Some((2031, 6, 1)),
        ),
        instrument(
            "BOND1003",
            ["Corporate", "Financial", "Banking"],
            Some("A"),
            "Senior Unsecured",
            "JPM 5.0 2029",
            Some((2029, 3, 20)),
        ),
        instrument(
            "BOND1004",
            ["Corporate", "Industrial", ""],
            Some("BBB"),
            "Senior Unsecured",
            "CAT 4.1 2030",
            Some((2030, 9, 30)),
        ),
        instrument(
            "EQ2001",
            ["Equity", "Technology", "Large Cap"],
            None,
            "Common Stock",
            "MSFT",
            None,
        ),
        instrument(
            "EQ2002",
            ["Equity", "Energy", ""],
            None,
            "Common Stock",
            "XOM",
            None,
        ),
    ]
}

/// Instruments the demo model knows about but has not grouped yet
pub fn ungrouped_instruments() -> Vec<&'static str> {
    vec!["BOND1005", "EQ2003"]
}

/// A sandbox model preloaded with the demo book
pub fn seeded_model() -> InMemoryModel {
    let model = InMemoryModel::with_groupings(demo_groupings());
    model.register_instruments(ungrouped_instruments());
    model
}
