//! Filtering, scoring and pagination over a snapshot of image records.
//!
//! Filter dimensions (tag, description, color) combine with AND; multiple
//! values within one dimension combine with OR. The color dimension matches
//! a record when the one-hot query vector dotted with the stored hue
//! histogram clears a fixed threshold. Records are only borrowed for the
//! duration of one query evaluation.

use serde::{Deserialize, Serialize};

use crate::library::ImageRecord;
use crate::vectors::{self, VectorSpace};

/// Minimum dot product between a one-hot color query and a stored color
/// vector for the record to count as matching that color.
pub const COLOR_MATCH_THRESHOLD: f32 = 0.3;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageQuery {
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
    pub colors: Option<Vec<String>>,

    /// Accepted and range-checked for the similar endpoint. The rank score
    /// is a norm proxy (see `similar_images`), so the threshold does not
    /// currently gate results.
    pub threshold: f32,

    pub skip: usize,
    pub limit: usize,
}

impl Default for ImageQuery {
    fn default() -> Self {
        Self {
            tags: None,
            description: None,
            colors: None,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            skip: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ImageQuery {
    pub fn validate(&self) -> Result<(), String> {
        if self.limit < 1 || self.limit > MAX_LIMIT {
            return Err(format!("limit must be in [1, {MAX_LIMIT}]"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err("threshold must be in [0.0, 1.0]".to_string());
        }
        Ok(())
    }

    fn tag_filter(&self) -> Option<&Vec<String>> {
        self.tags.as_ref().filter(|t| !t.is_empty())
    }

    fn desc_filter(&self) -> Option<&str> {
        self.description.as_deref().filter(|d| !d.is_empty())
    }

    fn color_filter(&self) -> Option<&Vec<String>> {
        self.colors.as_ref().filter(|c| !c.is_empty())
    }

    fn has_filters(&self) -> bool {
        self.tag_filter().is_some() || self.desc_filter().is_some() || self.color_filter().is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub data: Vec<ImageRecord>,
    pub count: usize,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl Page {
    fn empty(query: &ImageQuery) -> Self {
        Self {
            data: vec![],
            count: 0,
            total: 0,
            page: page_number(query.skip, query.limit),
            page_size: query.limit,
        }
    }

    fn from_matches(matches: Vec<ImageRecord>, query: &ImageQuery) -> Self {
        let total = matches.len();
        let data: Vec<ImageRecord> = matches
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .collect();

        Self {
            count: data.len(),
            total,
            page: page_number(query.skip, query.limit),
            page_size: query.limit,
            data,
        }
    }
}

pub fn page_number(skip: usize, limit: usize) -> usize {
    if limit > 0 {
        skip / limit + 1
    } else {
        1
    }
}

/// A candidate paired with its rank score. Built fresh per query, never
/// stored.
struct ScoredImage<'a> {
    record: &'a ImageRecord,
    score: f32,
}

/// Build one-hot query vectors for each color token. Unknown names and
/// malformed hex are logged and skipped; they never fail the whole filter.
fn color_query_vectors(tokens: &[String], space: &VectorSpace) -> Vec<Vec<f32>> {
    tokens
        .iter()
        .filter_map(|token| match space.color_query_one_hot(token) {
            Ok(one_hot) => Some(one_hot),
            Err(err) => {
                log::warn!("invalid color filter token '{token}': {err}");
                None
            }
        })
        .collect()
}

/// A record matches the color dimension when any query vector scores at
/// least `COLOR_MATCH_THRESHOLD` against its stored color vector. Records
/// without a color vector never match.
fn matches_color(record: &ImageRecord, one_hots: &[Vec<f32>]) -> bool {
    let Some(color_vec) = record.color_vec.as_ref() else {
        return false;
    };
    one_hots
        .iter()
        .any(|q| vectors::dot(q, color_vec) >= COLOR_MATCH_THRESHOLD)
}

/// Tag dimension for the listing path: any query tag appearing as a
/// case-insensitive substring of any tag label.
fn matches_tag_substring(record: &ImageRecord, tags: &[String]) -> bool {
    tags.iter().any(|query_tag| {
        let query_tag = query_tag.to_lowercase();
        record
            .tags
            .iter()
            .any(|label| label.to_lowercase().contains(&query_tag))
    })
}

/// Tag dimension for the similarity path: any query tag present as a
/// case-insensitive exact label.
fn matches_tag_exact(record: &ImageRecord, tags: &[String]) -> bool {
    tags.iter().any(|query_tag| {
        let query_tag = query_tag.to_lowercase();
        record
            .tags
            .iter()
            .any(|label| label.to_lowercase() == query_tag)
    })
}

/// Description dimension: case-insensitive substring. Records without a
/// description never match.
fn matches_description(record: &ImageRecord, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    record
        .description
        .as_ref()
        .map(|d| d.to_lowercase().contains(&needle))
        .unwrap_or(false)
}

/// Filtered listing. Without filters every record is returned newest first;
/// with filters the AND of all active dimensions is taken, then sorted
/// newest first and paginated.
pub fn list_images(records: &[ImageRecord], query: &ImageQuery, space: &VectorSpace) -> Page {
    if !query.has_filters() {
        let mut all: Vec<&ImageRecord> = records.iter().collect();
        all.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        return Page::from_matches(all.into_iter().cloned().collect(), query);
    }

    // color dimension is resolved first so an empty color match set can
    // short-circuit before the other dimensions are evaluated
    let color_one_hots = query.color_filter().map(|tokens| color_query_vectors(tokens, space));
    if let Some(ref one_hots) = color_one_hots {
        if !records.iter().any(|r| matches_color(r, one_hots)) {
            return Page::empty(query);
        }
    }

    let mut matches: Vec<&ImageRecord> = records
        .iter()
        .filter(|record| {
            if let Some(tags) = query.tag_filter() {
                if !matches_tag_substring(record, tags) {
                    return false;
                }
            }
            if let Some(needle) = query.desc_filter() {
                if !matches_description(record, needle) {
                    return false;
                }
            }
            if let Some(ref one_hots) = color_one_hots {
                if !matches_color(record, one_hots) {
                    return false;
                }
            }
            true
        })
        .collect();

    if matches.is_empty() {
        return Page::empty(query);
    }

    matches.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

    Page::from_matches(matches.into_iter().cloned().collect(), query)
}

/// Similarity-ranked listing. Candidates without a tag vector are excluded,
/// the remainder pass the same AND/OR filter contract, and survivors are
/// ranked by the Euclidean norm of their own tag vector.
///
/// The norm stands in for a query-to-candidate similarity because no
/// reference image is supplied. Changing the proxy changes ranked output
/// order, so it is preserved as-is.
pub fn similar_images(records: &[ImageRecord], query: &ImageQuery, space: &VectorSpace) -> Page {
    if records.is_empty() {
        return Page::empty(query);
    }

    let color_one_hots = query.color_filter().map(|tokens| color_query_vectors(tokens, space));

    let mut scored: Vec<ScoredImage> = vec![];
    for record in records {
        let Some(tag_vec) = record.tag_vec.as_ref() else {
            continue;
        };

        if let Some(tags) = query.tag_filter() {
            if !matches_tag_exact(record, tags) {
                continue;
            }
        }
        if let Some(needle) = query.desc_filter() {
            if !matches_description(record, needle) {
                continue;
            }
        }
        if let Some(ref one_hots) = color_one_hots {
            if !matches_color(record, one_hots) {
                continue;
            }
        }

        scored.push(ScoredImage {
            record,
            score: vectors::l2_norm(tag_vec),
        });
    }

    if scored.is_empty() {
        return Page::empty(query);
    }

    // stable: ties keep retrieval order
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Page::from_matches(scored.into_iter().map(|s| s.record.clone()).collect(), query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::Eid;
    use crate::library::ProcessingStatus;
    use chrono::{Duration, Utc};

    fn record(id: &str, tags: &[&str], description: Option<&str>) -> ImageRecord {
        let space = VectorSpace::default();
        let tag_vec = if tags.is_empty() {
            None
        } else {
            Some(space.tag_vector(tags.iter().copied()))
        };

        ImageRecord {
            id: Eid::from(id),
            user_id: "user-1".to_string(),
            filename: format!("{id}.png"),
            original_path: format!("user-1/{id}.png"),
            thumbnail_path: None,
            uploaded_at: Utc::now(),
            description: description.map(String::from),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            colors: vec![],
            tag_vec,
            color_vec: None,
            status: ProcessingStatus::Completed,
        }
    }

    fn with_colors(mut r: ImageRecord, hexes: &[&str]) -> ImageRecord {
        let space = VectorSpace::default();
        r.colors = hexes.iter().map(|h| h.to_string()).collect();
        r.color_vec = Some(space.color_vector(hexes.iter().copied()));
        r
    }

    fn query() -> ImageQuery {
        ImageQuery::default()
    }

    fn ids(page: &Page) -> Vec<String> {
        page.data.iter().map(|r| r.id.to_string()).collect()
    }

    #[test]
    fn test_tag_filter_or_within_dimension() {
        let space = VectorSpace::default();
        let records = vec![
            record("a", &["cat"], None),
            record("b", &["dog"], None),
            record("c", &["cat", "dog"], None),
            record("d", &["bird"], None),
        ];

        let q = ImageQuery {
            tags: Some(vec!["cat".to_string(), "dog".to_string()]),
            ..query()
        };

        let page = list_images(&records, &q, &space);
        assert_eq!(page.total, 3);
        let got = ids(&page);
        assert!(got.contains(&"a".to_string()));
        assert!(got.contains(&"b".to_string()));
        assert!(got.contains(&"c".to_string()));
    }

    #[test]
    fn test_and_across_dimensions() {
        let space = VectorSpace::default();
        let records = vec![
            record("a", &["cat"], Some("a cat on a mat")),
            record("b", &["dog"], None),
            record("c", &["cat", "dog"], Some("dogs at the beach")),
        ];

        let q = ImageQuery {
            tags: Some(vec!["cat".to_string(), "dog".to_string()]),
            description: Some("beach".to_string()),
            ..query()
        };

        let page = list_images(&records, &q, &space);
        assert_eq!(page.total, 1);
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn test_description_absent_never_matches() {
        let space = VectorSpace::default();
        let records = vec![record("a", &["cat"], None)];

        let q = ImageQuery {
            description: Some("cat".to_string()),
            ..query()
        };

        assert_eq!(list_images(&records, &q, &space).total, 0);
    }

    #[test]
    fn test_color_filter_matches_same_bin() {
        let space = VectorSpace::default();
        let records = vec![
            with_colors(record("red", &["x"], None), &["#FF0000", "#E01010"]),
            with_colors(record("cyan", &["y"], None), &["#00FFFF"]),
        ];

        let q = ImageQuery {
            colors: Some(vec!["red".to_string()]),
            ..query()
        };

        let page = list_images(&records, &q, &space);
        assert_eq!(page.total, 1);
        assert_eq!(ids(&page), vec!["red"]);
    }

    #[test]
    fn test_color_filter_missing_vector_excluded() {
        let space = VectorSpace::default();
        // record has color labels but no stored vector
        let mut r = record("a", &["x"], None);
        r.colors = vec!["#FF0000".to_string()];
        let records = vec![r];

        let q = ImageQuery {
            colors: Some(vec!["red".to_string()]),
            ..query()
        };

        let page = list_images(&records, &q, &space);
        assert_eq!(page.total, 0);
        assert_eq!(page.count, 0);
    }

    #[test]
    fn test_empty_color_match_short_circuits() {
        let space = VectorSpace::default();
        let records = vec![with_colors(record("a", &["x"], None), &["#00FFFF"])];

        let q = ImageQuery {
            colors: Some(vec!["red".to_string()]),
            ..query()
        };

        let page = list_images(&records, &q, &space);
        assert_eq!(page.count, 0);
        assert_eq!(page.total, 0);
        assert!(page.data.is_empty());
    }

    #[test]
    fn test_malformed_color_token_skipped() {
        let space = VectorSpace::default();
        let records = vec![with_colors(record("red", &["x"], None), &["#FF0000"])];

        let q = ImageQuery {
            colors: Some(vec!["#ZZZZZZ".to_string(), "red".to_string()]),
            ..query()
        };

        // the malformed token is skipped, the valid one still matches
        let page = list_images(&records, &q, &space);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn test_unfiltered_list_newest_first() {
        let space = VectorSpace::default();
        let mut old = record("old", &[], None);
        old.uploaded_at = Utc::now() - Duration::hours(2);
        let mut new = record("new", &[], None);
        new.uploaded_at = Utc::now();

        let page = list_images(&[old, new], &query(), &space);
        assert_eq!(ids(&page), vec!["new", "old"]);
    }

    #[test]
    fn test_pagination_math() {
        let space = VectorSpace::default();
        let records: Vec<ImageRecord> = (0..45)
            .map(|i| record(&format!("r{i}"), &["all"], None))
            .collect();

        let q = ImageQuery {
            tags: Some(vec!["all".to_string()]),
            skip: 20,
            limit: 20,
            ..query()
        };
        let page = list_images(&records, &q, &space);
        assert_eq!(page.page, 2);
        assert_eq!(page.count, 20);
        assert_eq!(page.total, 45);

        let q = ImageQuery { skip: 40, ..q };
        let page = list_images(&records, &q, &space);
        assert_eq!(page.page, 3);
        assert_eq!(page.count, 5);
        assert_eq!(page.total, 45);
    }

    #[test]
    fn test_similar_excludes_records_without_tag_vec() {
        let space = VectorSpace::default();
        let records = vec![record("has-vec", &["cat"], None), record("no-vec", &[], None)];

        let page = similar_images(&records, &query(), &space);
        assert_eq!(page.total, 1);
        assert_eq!(ids(&page), vec!["has-vec"]);
    }

    #[test]
    fn test_similar_tag_filter_is_exact_membership() {
        let space = VectorSpace::default();
        let records = vec![
            record("exact", &["cat"], None),
            record("superstring", &["catalog"], None),
        ];

        let q = ImageQuery {
            tags: Some(vec!["cat".to_string()]),
            ..query()
        };

        // the listing path would match both; the similarity path only the
        // exact label
        assert_eq!(list_images(&records, &q, &space).total, 2);
        let page = similar_images(&records, &q, &space);
        assert_eq!(ids(&page), vec!["exact"]);
    }

    #[test]
    fn test_similar_ranked_by_norm_desc_stable() {
        let space = VectorSpace::default();
        // all enriched vectors are unit-norm, so equal scores keep
        // retrieval order; a hand-built shorter vector ranks below
        let mut weak = record("weak", &["z"], None);
        weak.tag_vec = Some({
            let mut v = vec![0.0f32; space.tag_dim()];
            v[0] = 0.5;
            v
        });

        let records = vec![record("a", &["cat"], None), record("b", &["dog"], None), weak];

        let page = similar_images(&records, &query(), &space);
        assert_eq!(ids(&page), vec!["a", "b", "weak"]);
    }

    #[test]
    fn test_similar_empty_short_circuit() {
        let space = VectorSpace::default();
        let page = similar_images(&[], &query(), &space);
        assert_eq!(page.count, 0);
        assert_eq!(page.total, 0);
        assert_eq!(page.page, 1);
    }

    #[test]
    fn test_query_validation() {
        assert!(query().validate().is_ok());

        let q = ImageQuery { limit: 0, ..query() };
        assert!(q.validate().is_err());

        let q = ImageQuery { limit: 101, ..query() };
        assert!(q.validate().is_err());

        let q = ImageQuery { threshold: 1.5, ..query() };
        assert!(q.validate().is_err());
    }
}
