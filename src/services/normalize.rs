//! Conversion of decoded source payloads into canonical records.
//!
//! Normalizers never fail: an item that cannot be decoded is logged and
//! skipped, and a missing field falls back to its placeholder.

use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::db::models::calendar::{ALL_DAY_END, ALL_DAY_START, UNKNOWN_CREATOR, UNTITLED_EVENT};
use crate::db::models::{
    CalendarEvent, Day, Faculty, Group, GroupInfo, Lesson, Week, WeekInfo,
};
use crate::services::calendar_source::{EventsPayload, RawEvent};
use crate::services::schedule_source::{
    FacultiesPayload, GroupsPayload, RawDay, RawFaculty, RawGroup, RawLesson, WeekPayload,
};

fn decode_items<T: DeserializeOwned>(items: Vec<serde_json::Value>, kind: &str) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping malformed {}: {}", kind, e);
                None
            }
        })
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Calendar
// ============================================================================

pub fn normalize_events(payload: EventsPayload, calendar_name: &str) -> Vec<CalendarEvent> {
    decode_items::<RawEvent>(payload.items, "calendar event")
        .into_iter()
        .filter(|e| e.status.as_deref() != Some("cancelled"))
        .map(|e| normalize_event(e, calendar_name))
        .collect()
}

fn parse_date_time(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    value.and_then(|v| DateTime::parse_from_rfc3339(v).ok())
}

/// Date and `HH:MM` span of an event, in the offset carried by the value.
fn event_span(event: &RawEvent) -> (String, String, String) {
    let start = event.start.clone().unwrap_or_default();
    let end = event.end.clone().unwrap_or_default();
    let all_day = || {
        (
            start.date.clone().unwrap_or_default(),
            ALL_DAY_START.to_string(),
            ALL_DAY_END.to_string(),
        )
    };

    if start.date_time.is_none() {
        return all_day();
    }

    match (
        parse_date_time(start.date_time.as_deref()),
        parse_date_time(end.date_time.as_deref()),
    ) {
        (Some(s), Some(e)) => (
            s.format("%Y-%m-%d").to_string(),
            s.format("%H:%M").to_string(),
            e.format("%H:%M").to_string(),
        ),
        _ => {
            warn!(
                "Unparseable event time {:?}..{:?} for {:?}; treating as all-day",
                start.date_time,
                end.date_time,
                event.summary.as_deref().unwrap_or(UNTITLED_EVENT)
            );
            all_day()
        }
    }
}

fn normalize_event(event: RawEvent, calendar_name: &str) -> CalendarEvent {
    let (date, start_time, end_time) = event_span(&event);
    CalendarEvent {
        title: non_blank(event.summary).unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        description: event.description.unwrap_or_default(),
        date,
        start_time,
        end_time,
        location: event.location.unwrap_or_default(),
        creator: non_blank(event.creator.and_then(|c| c.email))
            .unwrap_or_else(|| UNKNOWN_CREATOR.to_string()),
        calendar_name: calendar_name.to_string(),
    }
}

// ============================================================================
// Directory
// ============================================================================

pub fn normalize_faculties(payload: FacultiesPayload) -> Vec<Faculty> {
    decode_items::<RawFaculty>(payload.faculties, "faculty")
        .into_iter()
        .map(|f| Faculty {
            id: f.id,
            name: f.name,
            abbr: f.abbr,
        })
        .collect()
}

pub fn normalize_groups(payload: GroupsPayload, faculty_id: i64) -> Vec<Group> {
    decode_items::<RawGroup>(payload.groups, "group")
        .into_iter()
        .map(|g| Group {
            id: g.id,
            name: g.name,
            faculty_id,
        })
        .collect()
}

// ============================================================================
// Timetable
// ============================================================================

/// `None` when the payload has no week descriptor.
pub fn normalize_week(payload: WeekPayload) -> Option<Week> {
    let info = payload.week?;
    let group = payload.group.unwrap_or_default();
    let group = GroupInfo {
        id: group.id,
        name: group.name,
    };

    let days = decode_items::<RawDay>(payload.days, "day")
        .into_iter()
        .map(|day| Day {
            lessons: decode_items::<RawLesson>(day.lessons, "lesson")
                .into_iter()
                .map(|l| normalize_lesson(l, &group.name))
                .collect(),
            date: day.date,
            weekday: day.weekday,
        })
        .collect();

    Some(Week {
        group,
        week: WeekInfo {
            date_start: info.date_start,
            date_end: info.date_end,
            is_odd: info.is_odd,
        },
        days,
    })
}

fn normalize_lesson(lesson: RawLesson, week_group: &str) -> Lesson {
    let auditory = lesson.auditories.and_then(|a| a.into_iter().next());
    let building = auditory.as_ref().and_then(|a| a.building.clone());

    Lesson {
        subject: lesson.subject,
        time_start: lesson.time_start,
        time_end: lesson.time_end,
        lesson_type: lesson.type_obj.and_then(|t| t.name).unwrap_or_default(),
        teacher: lesson
            .teachers
            .and_then(|t| t.into_iter().next())
            .and_then(|t| t.full_name)
            .unwrap_or_default(),
        group: match lesson.groups.and_then(|g| g.into_iter().next()) {
            Some(first) => first.name.unwrap_or_default(),
            None => week_group.to_string(),
        },
        auditory: auditory.and_then(|a| a.name).unwrap_or_default(),
        building: building
            .as_ref()
            .and_then(|b| non_blank(b.abbr.clone()).or_else(|| b.name.clone()))
            .unwrap_or_default(),
        place: building.and_then(|b| non_blank(b.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(json: serde_json::Value) -> Vec<CalendarEvent> {
        normalize_events(serde_json::from_value(json).unwrap(), "Events")
    }

    #[test]
    fn cancelled_and_all_day_events() {
        let out = events(serde_json::json!({
            "items": [
                {"status": "cancelled", "summary": "Gone", "start": {"date": "2024-05-01"}},
                {"status": "confirmed", "summary": "X", "start": {"date": "2024-05-01"}, "end": {"date": "2024-05-01"}}
            ]
        }));

        assert_eq!(out.len(), 1);
        let x = &out[0];
        assert_eq!(x.title, "X");
        assert_eq!(x.date, "2024-05-01");
        assert_eq!((x.start_time.as_str(), x.end_time.as_str()), ("00:00", "23:59"));
        assert!(x.is_all_day());
        assert_eq!(x.description, "");
        assert_eq!(x.location, "");
        assert_eq!(x.creator, "unknown");
        assert_eq!(x.calendar_name, "Events");
    }

    #[test]
    fn malformed_date_time_does_not_affect_siblings() {
        let out = events(serde_json::json!({
            "items": [
                {
                    "summary": "Broken",
                    "start": {"dateTime": "not-a-time", "date": "2024-05-03"},
                    "end": {"dateTime": "2024-05-03T12:00:00Z"}
                },
                {
                    "summary": "Lecture",
                    "creator": {"email": "events@example.org"},
                    "start": {"dateTime": "2024-05-03T10:15:00+03:00"},
                    "end": {"dateTime": "2024-05-03T11:45:00+03:00"}
                },
                {"summary": "No date", "start": {"dateTime": "2024-13-40T99:00:00Z"}},
                "not even an object"
            ]
        }));

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].date, "2024-05-03");
        assert!(out[0].is_all_day());

        assert_eq!(out[1].date, "2024-05-03");
        assert_eq!(out[1].start_time, "10:15");
        assert_eq!(out[1].end_time, "11:45");
        assert_eq!(out[1].creator, "events@example.org");

        assert_eq!(out[2].date, "");
        assert!(out[2].is_all_day());
    }

    #[test]
    fn utc_times_stay_in_utc() {
        let out = events(serde_json::json!({
            "items": [{
                "start": {"dateTime": "2024-05-31T23:30:00Z"},
                "end": {"dateTime": "2024-06-01T00:30:00Z"}
            }]
        }));
        assert_eq!(out[0].title, "(untitled)");
        assert_eq!(out[0].date, "2024-05-31");
        assert_eq!(out[0].start_time, "23:30");
        assert_eq!(out[0].end_time, "00:30");
    }

    #[test]
    fn lessons_take_first_of_each_list() {
        let payload: WeekPayload = serde_json::from_value(serde_json::json!({
            "group": {"id": 35433, "name": "3530901/10001"},
            "week": {"date_start": "2024.09.02", "date_end": "2024.09.08", "is_odd": false},
            "days": [{
                "date": "2024-09-02",
                "weekday": 1,
                "lessons": [
                    {
                        "subject": "Physics",
                        "time_start": "10:00",
                        "time_end": "11:40",
                        "typeObj": {"name": "Lecture"},
                        "teachers": [{"full_name": "Ivanova A. A."}, {"full_name": "Petrov B. B."}],
                        "groups": [{"name": "3530901/10002"}],
                        "auditories": [{"name": "101", "building": {"name": "Main building", "abbr": "GZ"}}]
                    },
                    {"subject": "Self study", "time_start": "12:00", "time_end": "13:40"},
                    {"time_start": "14:00"}
                ]
            }]
        }))
        .unwrap();

        let week = normalize_week(payload).unwrap();
        assert_eq!(week.group.id, 35433);
        assert_eq!(week.week.is_odd, Some(false));
        let day = &week.days[0];
        assert_eq!(day.weekday, "1");
        assert_eq!(day.lessons.len(), 2);

        let physics = &day.lessons[0];
        assert_eq!(physics.lesson_type, "Lecture");
        assert_eq!(physics.teacher, "Ivanova A. A.");
        assert_eq!(physics.group, "3530901/10002");
        assert_eq!(physics.auditory, "101");
        assert_eq!(physics.building, "GZ");
        assert_eq!(physics.place.as_deref(), Some("Main building"));

        let study = &day.lessons[1];
        assert_eq!(study.group, "3530901/10001");
        assert_eq!(study.teacher, "");
        assert_eq!(study.building, "");
        assert_eq!(study.place, None);
    }

    #[test]
    fn malformed_day_does_not_drop_the_week() {
        let payload: WeekPayload = serde_json::from_value(serde_json::json!({
            "group": {"id": 35433, "name": "3530901/10001"},
            "week": {"date_start": "2024.09.02", "date_end": "2024.09.08", "is_odd": false},
            "days": [
                {"date": null, "weekday": 1, "lessons": [{"subject": "Lost", "time_start": "08:00"}]},
                {"date": "2024-09-03", "weekday": 2, "lessons": [
                    {"subject": "Physics", "time_start": "10:00", "time_end": "11:40"}
                ]},
                "not a day"
            ]
        }))
        .unwrap();

        let week = normalize_week(payload).expect("week descriptor present");
        assert_eq!(week.days.len(), 1);
        assert_eq!(week.days[0].date, "2024-09-03");
        assert_eq!(week.days[0].lessons[0].subject, "Physics");
        assert_eq!(week.lesson_count(), 1);
    }

    #[test]
    fn week_without_descriptor_is_no_data() {
        let payload: WeekPayload = serde_json::from_str(r#"{"days": []}"#).unwrap();
        assert!(normalize_week(payload).is_none());
    }

    #[test]
    fn directory_items() {
        let faculties: FacultiesPayload = serde_json::from_str(
            r#"{"faculties": [{"id": 95, "name": "Institute of Physics", "abbr": "IP"}, {"name": "no id"}]}"#,
        )
        .unwrap();
        assert_eq!(
            normalize_faculties(faculties),
            vec![Faculty { id: 95, name: "Institute of Physics".into(), abbr: "IP".into() }]
        );

        let groups: GroupsPayload =
            serde_json::from_str(r#"{"groups": [{"id": 40, "name": "5130201/20001"}]}"#).unwrap();
        assert_eq!(normalize_groups(groups, 122)[0].faculty_id, 122);
    }
}
