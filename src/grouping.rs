use chrono::{Local, NaiveDate, TimeZone};

use crate::api::models::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum Row<'a> {
    Day(NaiveDate),
    Message(&'a Message),
}

/// Splits an ordered message list into display rows, with a day separator
/// before the first message and whenever the local calendar date changes.
pub fn group_by_day(messages: &[Message]) -> Vec<Row<'_>> {
    group_by_day_in(messages, &Local)
}

pub fn group_by_day_in<'a, Tz: TimeZone>(messages: &'a [Message], tz: &Tz) -> Vec<Row<'a>> {
    let mut rows = Vec::with_capacity(messages.len() + 1);
    let mut current: Option<NaiveDate> = None;
    for msg in messages {
        let day = msg.created_at.with_timezone(tz).date_naive();
        if current != Some(day) {
            rows.push(Row::Day(day));
            current = Some(day);
        }
        rows.push(Row::Message(msg));
    }
    rows
}

pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%B %-d, %Y").to_string()
    }
}
