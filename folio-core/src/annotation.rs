use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Point, Rect};
use crate::PageNumber;

pub type AnnotationId = Uuid;

const HIGHLIGHT_HIT_PADDING: f32 = 2.0;
const UNDERLINE_HIT_PADDING: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Underline,
}

/// A stored highlight or underline. Rects are page-local, in scale-1 units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub page: PageNumber,
    pub kind: AnnotationKind,
    pub color: String,
    pub rects: Vec<Rect>,
    pub selected_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub kind: AnnotationKind,
    pub page: PageNumber,
    pub text: String,
    pub color: String,
    pub rects: Vec<Rect>,
}

impl Annotation {
    pub fn create(new: NewAnnotation) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            page: new.page,
            kind: new.kind,
            color: new.color,
            rects: new.rects,
            selected_text: new.text,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_comment(&mut self, text: String) {
        self.comment = if text.trim().is_empty() {
            None
        } else {
            Some(text)
        };
        self.updated_at = now_millis().max(self.updated_at);
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One rectangle to paint over a rendered page, in pixels at the current scale.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMark {
    pub annotation: AnnotationId,
    pub kind: AnnotationKind,
    pub color: String,
    pub rect: Rect,
}

pub fn underline_thickness(scale: f32) -> f32 {
    (scale * 1.4).round().max(2.0)
}

/// The strip an underline occupies at the bottom of `rect` (already scaled).
pub fn underline_band(rect: &Rect, scale: f32) -> Rect {
    let thickness = underline_thickness(scale);
    Rect::new(rect.left, rect.bottom() - thickness, rect.width, thickness)
}

pub fn overlay_marks(annotations: &[Annotation], page: PageNumber, scale: f32) -> Vec<OverlayMark> {
    annotations
        .iter()
        .filter(|annotation| annotation.page == page)
        .flat_map(|annotation| {
            annotation.rects.iter().map(move |rect| {
                let scaled = rect.scaled(scale);
                let rect = match annotation.kind {
                    AnnotationKind::Highlight => scaled,
                    AnnotationKind::Underline => underline_band(&scaled, scale),
                };
                OverlayMark {
                    annotation: annotation.id,
                    kind: annotation.kind,
                    color: annotation.color.clone(),
                    rect,
                }
            })
        })
        .collect()
}

/// Finds the annotation under `point` (page-local, current-scale pixels).
///
/// Newer annotations win where geometry overlaps.
pub fn hit_test<'a>(
    annotations: &'a [Annotation],
    page: PageNumber,
    point: Point,
    scale: f32,
) -> Option<&'a Annotation> {
    let mut candidates: Vec<(usize, &Annotation)> = annotations
        .iter()
        .enumerate()
        .filter(|(_, annotation)| annotation.page == page)
        .collect();
    candidates.sort_by(|(ia, a), (ib, b)| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| ib.cmp(ia))
    });

    candidates
        .into_iter()
        .map(|(_, annotation)| annotation)
        .find(|annotation| {
            annotation.rects.iter().any(|rect| {
                let scaled = rect.scaled(scale);
                match annotation.kind {
                    AnnotationKind::Highlight => scaled.contains(point, HIGHLIGHT_HIT_PADDING),
                    AnnotationKind::Underline => {
                        underline_band(&scaled, scale).contains(point, UNDERLINE_HIT_PADDING)
                    }
                }
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(kind: AnnotationKind, page: PageNumber, rect: Rect, created_at: u64) -> Annotation {
        Annotation {
            id: Uuid::new_v4(),
            page,
            kind,
            color: "#ffd54f".into(),
            rects: vec![rect],
            selected_text: "text".into(),
            comment: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn underline_thickness_has_floor_of_two() {
        assert_eq!(underline_thickness(0.5), 2.0);
        assert_eq!(underline_thickness(1.0), 2.0);
        assert_eq!(underline_thickness(2.0), 3.0);
        assert_eq!(underline_thickness(3.0), 4.0);
    }

    #[test]
    fn overlay_scales_highlights_and_strips_underlines() {
        let items = vec![
            annotation(AnnotationKind::Highlight, 1, Rect::new(10.0, 10.0, 50.0, 12.0), 1),
            annotation(AnnotationKind::Underline, 1, Rect::new(10.0, 40.0, 50.0, 12.0), 2),
            annotation(AnnotationKind::Highlight, 2, Rect::new(0.0, 0.0, 5.0, 5.0), 3),
        ];

        let marks = overlay_marks(&items, 1, 2.0);
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0].rect, Rect::new(20.0, 20.0, 100.0, 24.0));
        assert_eq!(marks[1].rect, Rect::new(20.0, 101.0, 100.0, 3.0));
    }

    #[test]
    fn most_recent_annotation_wins_on_overlap() {
        let older = annotation(AnnotationKind::Highlight, 1, Rect::new(0.0, 0.0, 100.0, 20.0), 10);
        let newer = annotation(AnnotationKind::Highlight, 1, Rect::new(50.0, 0.0, 100.0, 20.0), 20);
        let items = vec![newer.clone(), older.clone()];

        let hit = hit_test(&items, 1, Point::new(75.0, 10.0), 1.0).unwrap();
        assert_eq!(hit.id, newer.id);
        let hit = hit_test(&items, 1, Point::new(20.0, 10.0), 1.0).unwrap();
        assert_eq!(hit.id, older.id);
    }

    #[test]
    fn highlight_hit_uses_two_pixel_padding() {
        let items = vec![annotation(
            AnnotationKind::Highlight,
            1,
            Rect::new(10.0, 10.0, 20.0, 10.0),
            1,
        )];
        assert!(hit_test(&items, 1, Point::new(8.5, 15.0), 1.0).is_some());
        assert!(hit_test(&items, 1, Point::new(7.0, 15.0), 1.0).is_none());
        assert!(hit_test(&items, 2, Point::new(15.0, 15.0), 1.0).is_none());
    }

    #[test]
    fn underline_hit_tests_the_strip_not_the_full_box() {
        // Box spans y 10..30, strip is y 28..30 at scale 1.
        let items = vec![annotation(
            AnnotationKind::Underline,
            1,
            Rect::new(10.0, 10.0, 40.0, 20.0),
            1,
        )];
        assert!(hit_test(&items, 1, Point::new(20.0, 29.0), 1.0).is_some());
        assert!(hit_test(&items, 1, Point::new(20.0, 24.0), 1.0).is_some());
        assert!(hit_test(&items, 1, Point::new(20.0, 15.0), 1.0).is_none());
        assert!(hit_test(&items, 1, Point::new(20.0, 34.5), 1.0).is_some());
    }

    #[test]
    fn blank_comment_clears_it() {
        let mut item = annotation(AnnotationKind::Highlight, 1, Rect::new(0.0, 0.0, 1.0, 1.0), 1);
        item.set_comment("remember this".into());
        assert_eq!(item.comment.as_deref(), Some("remember this"));
        item.set_comment("   ".into());
        assert!(item.comment.is_none());
    }
}
