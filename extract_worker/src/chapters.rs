//! Chapter description generation. The video host anchors chapter lists at
//! the video origin, so a list whose first timestamp isn't 00:00:00 gets a
//! synthetic "Pre-meeting" chapter prepended.

use cv_types::AgendaItem;

/// Milliseconds from video start as `HH:MM:SS`.
pub fn format_timestamp(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// The full description document: title line, blank line, `Chapters:`, one
/// line per timestamped item in time order. `items` must already be sorted.
pub fn chapter_description(meeting_title: &str, date_only: &str, items: &[AgendaItem]) -> String {
    let mut lines = vec![format!("{meeting_title} - {date_only}"), String::new(), "Chapters:".to_string()];

    let timestamped: Vec<&AgendaItem> = items.iter().filter(|i| i.bookmark.is_some()).collect();

    if let Some(first) = timestamped.first() {
        if first.bookmark.map(|b| b.time_start / 1000).unwrap_or(0) != 0 {
            lines.push("00:00:00 Pre-meeting".to_string());
        }
    }

    for item in timestamped {
        if let Some(bookmark) = item.bookmark {
            lines.push(format!("{} {}", format_timestamp(bookmark.time_start), item.title));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_types::Bookmark;

    fn item(id: i64, title: &str, time_start: Option<i64>) -> AgendaItem {
        AgendaItem {
            id,
            title: title.to_string(),
            bookmark: time_start.map(|time_start| Bookmark {
                agenda_item_id: id,
                time_start,
                time_end: time_start + 1000,
            }),
        }
    }

    #[test]
    fn timestamps_render_as_hms() {
        assert_eq!(format_timestamp(0), "00:00:00");
        assert_eq!(format_timestamp(5000), "00:00:05");
        assert_eq!(format_timestamp(65000), "00:01:05");
        assert_eq!(format_timestamp(3665000), "01:01:05");
        assert_eq!(format_timestamp(-100), "00:00:00");
    }

    #[test]
    fn synthesizes_a_pre_meeting_chapter_at_origin() {
        let items = vec![
            item(1, "Item A", Some(5000)),
            item(2, "Item B", Some(65000)),
            item(3, "Item C", Some(3665000)),
        ];

        let description = chapter_description("City Commission - Regular", "2025-06-05", &items);
        assert_eq!(
            description,
            "City Commission - Regular - 2025-06-05\n\
             \n\
             Chapters:\n\
             00:00:00 Pre-meeting\n\
             00:00:05 Item A\n\
             00:01:05 Item B\n\
             01:01:05 Item C\n"
        );
    }

    #[test]
    fn no_synthetic_chapter_when_first_item_is_at_origin() {
        let items = vec![item(1, "Call to Order", Some(0)), item(2, "Item B", Some(65000))];
        let description = chapter_description("City Commission - Regular", "2025-06-05", &items);
        assert!(!description.contains("Pre-meeting"));
        assert!(description.contains("00:00:00 Call to Order\n"));
    }

    #[test]
    fn sub_second_offsets_count_as_origin() {
        // 500ms renders as 00:00:00, so no synthetic chapter is needed.
        let items = vec![item(1, "Call to Order", Some(500))];
        let description = chapter_description("t", "2025-06-05", &items);
        assert_eq!(description.matches("00:00:00").count(), 1);
    }

    #[test]
    fn untimed_items_are_omitted_from_chapters() {
        let items = vec![item(1, "Item A", Some(5000)), item(2, "Unlisted", None)];
        let description = chapter_description("t", "2025-06-05", &items);
        assert!(!description.contains("Unlisted"));
    }

    #[test]
    fn first_timestamp_is_always_origin_when_any_exist() {
        // Property: for any non-empty timestamped list, the first chapter
        // line is 00:00:00.
        for starts in [vec![0i64], vec![5000], vec![1000, 2000], vec![3_600_000]] {
            let items: Vec<AgendaItem> = starts
                .iter()
                .enumerate()
                .map(|(i, &s)| item(i as i64, "x", Some(s)))
                .collect();
            let description = chapter_description("t", "2025-06-05", &items);
            let first_chapter = description.lines().nth(3).unwrap();
            assert!(first_chapter.starts_with("00:00:00"), "bad first chapter: {first_chapter}");
        }
    }
}
