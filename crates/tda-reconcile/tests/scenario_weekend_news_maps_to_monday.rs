//! Pure mapping + aggregation over a week with a weekend and a holiday.

use chrono::NaiveDate;
use tda_reconcile::{absorption_window, aggregate, map_dates, Calendar, Strategy};
use tda_schemas::{Category, CategoryCounts, Event};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
}

// Thu 04-18 is a holiday.
fn week() -> Calendar {
    Calendar::from_days(vec![d(15), d(16), d(17), d(19), d(22)])
}

fn events() -> Vec<Event> {
    vec![
        Event::new(d(13), Category::Positive),
        Event::new(d(14), Category::Negative),
        Event::new(d(15), Category::Neutral),
        Event::new(d(18), Category::Positive),
        Event::new(d(20), Category::Negative),
        Event::new(d(21), Category::Negative),
        Event::new(d(25), Category::Positive),
    ]
}

#[test]
fn carry_forward_folds_weekend_and_holiday() {
    let events = events();
    let cal = week();
    let m = map_dates(events.iter().map(|e| e.date), &cal, Strategy::CarryForward);
    let agg = aggregate(&events, &m);

    assert_eq!(agg.dropped, 0);
    assert_eq!(agg.days[&d(15)], CategoryCounts::new(1, 1, 1));
    assert_eq!(agg.days[&d(19)], CategoryCounts::new(1, 0, 0));
    // weekend before 04-22 plus 04-25 past the last trading day
    assert_eq!(agg.days[&d(22)], CategoryCounts::new(1, 2, 0));
    assert_eq!(agg.days.len(), 3);
    assert_eq!(agg.total().total(), events.len() as i64);
}

#[test]
fn every_mapped_date_falls_in_its_day_window() {
    let cal = week();
    let m = map_dates((10..=28).map(d), &cal, Strategy::CarryForward);
    for date in (10..=28).map(d) {
        let day = m.absorbing_day(date).unwrap();
        let w = absorption_window(day, &cal, Strategy::CarryForward).unwrap();
        assert!(w.contains(date), "{date} not in window of {day}");
    }
}

#[test]
fn daily_direct_keeps_every_date() {
    let events = events();
    let m = map_dates(events.iter().map(|e| e.date), &week(), Strategy::DailyDirect);
    let agg = aggregate(&events, &m);

    assert_eq!(agg.days.len(), 7);
    assert_eq!(agg.days[&d(18)], CategoryCounts::new(1, 0, 0));
}
