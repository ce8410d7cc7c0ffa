//! Catalog query types and cross-entity view models.
//!
//! The filter/sort/page combination compiles to SQL fragments here, so the
//! join semantics (mean rating, favorite flag, chapter counts) stay testable
//! without a database. `crate::db` executes the assembled statements.

use serde::Serialize;

/// Fixed catalog page size.
pub const PAGE_SIZE: u32 = 6;

/// Conjunctive catalog filters.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    /// Match books carrying any of these tags.
    pub tags: Vec<String>,
    /// Match books in any of these categories.
    pub categories: Vec<String>,
    /// Full-text query against title and description.
    pub text: Option<String>,
}

impl BookFilter {
    /// SQL fragment appended to a `WHERE b.is_published = 1` base clause.
    ///
    /// Placeholders are positional; bind [`filter_params`](Self::filter_params)
    /// in the same order.
    pub fn filter_sql(&self) -> String {
        let mut sql = String::new();

        if !self.categories.is_empty() {
            sql.push_str(" AND b.category IN (");
            sql.push_str(&placeholders(self.categories.len()));
            sql.push(')');
        }

        if !self.tags.is_empty() {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM book_tags t WHERE t.book_id = b.id AND t.tag IN (",
            );
            sql.push_str(&placeholders(self.tags.len()));
            sql.push_str("))");
        }

        if self.text.is_some() {
            sql.push_str(" AND (b.title LIKE ? OR b.description LIKE ?)");
        }

        sql
    }

    /// Owned parameters matching [`filter_sql`](Self::filter_sql) order.
    pub fn filter_params(&self) -> Vec<String> {
        let mut params: Vec<String> = Vec::new();
        params.extend(self.categories.iter().cloned());
        params.extend(self.tags.iter().cloned());
        if let Some(text) = &self.text {
            let pattern = format!("%{}%", text);
            params.push(pattern.clone());
            params.push(pattern);
        }
        params
    }

    /// Whether any filter is set.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.categories.is_empty() && self.text.is_none()
    }
}

/// Catalog sort modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookSort {
    /// Insertion order (default).
    #[default]
    Recent,
    /// Descending mean rating.
    Popularity,
    /// Viewer's favorites first.
    Favorite,
}

impl BookSort {
    /// Parse the wire value; anything unknown falls back to insertion order.
    pub fn from_query(s: &str) -> Self {
        match s {
            "popularity" => BookSort::Popularity,
            "favorite" => BookSort::Favorite,
            _ => BookSort::Recent,
        }
    }

    /// ORDER BY clause body. `avg_rate` and `favorite` are computed columns
    /// of the listing statement.
    pub fn order_sql(&self) -> &'static str {
        match self {
            BookSort::Recent => "b.created_at, b.rowid",
            BookSort::Popularity => "avg_rate DESC, b.created_at, b.rowid",
            BookSort::Favorite => "favorite DESC, b.created_at, b.rowid",
        }
    }
}

/// 1-indexed catalog page.
#[derive(Debug, Clone, Copy)]
pub struct Page(pub u32);

impl Page {
    /// LIMIT / OFFSET pair for this page.
    pub fn limit_offset(&self) -> (i64, i64) {
        let page = self.0.max(1);
        (
            i64::from(PAGE_SIZE),
            i64::from(PAGE_SIZE) * i64::from(page - 1),
        )
    }
}

/// Complete catalog listing query.
#[derive(Debug, Clone)]
pub struct BookQuery {
    /// Conjunctive filters.
    pub filter: BookFilter,
    /// Sort mode.
    pub sort: BookSort,
    /// Requested page.
    pub page: Page,
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

// ============================================================================
// VIEW MODELS
// ============================================================================

/// Author projection joined into catalog views.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorSummary {
    /// Author username.
    pub username: String,
    /// Author profile description.
    pub description: Option<String>,
    /// Author avatar path.
    pub avatar_path: Option<String>,
}

/// One catalog listing row.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    /// Book ID.
    pub id: String,
    /// Book title.
    pub title: String,
    /// Book slug.
    pub slug: String,
    /// Back-cover description.
    pub description: String,
    /// Category.
    pub category: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Cover asset path.
    pub cover_path: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
    /// Author projection.
    pub author: AuthorSummary,
    /// Mean rating over all ratings, 0 when unrated.
    pub avg_rate: f64,
    /// Whether the viewer favorited this book.
    pub favorite: bool,
}

/// A catalog page with its total matching count.
#[derive(Debug, Clone, Serialize)]
pub struct BookPage {
    /// Page size used.
    pub limit: u32,
    /// Total books matching the filters.
    pub total: i64,
    /// Rows of the requested page.
    pub books: Vec<BookSummary>,
}

/// Chapter projection inside a book detail view.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterSummary {
    /// Chapter ID.
    pub id: String,
    /// Chapter title.
    pub title: String,
    /// Chapter slug.
    pub slug: String,
    /// Author-assigned position.
    pub chapter_order: i64,
    /// Whether the chapter is published.
    pub is_published: bool,
    /// Chapter body; present only in reader (slug) views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Single book with author and chapters.
#[derive(Debug, Clone, Serialize)]
pub struct BookDetail {
    /// Book ID.
    pub id: String,
    /// Owning author's user ID.
    pub user_id: String,
    /// Book title.
    pub title: String,
    /// Book slug.
    pub slug: String,
    /// Back-cover description.
    pub description: String,
    /// Category.
    pub category: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Cover asset path.
    pub cover_path: Option<String>,
    /// Whether the book is published.
    pub is_published: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Author projection.
    pub author: AuthorSummary,
    /// Mean rating; computed on reader (slug) views only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rate: Option<f64>,
    /// Viewer favorite flag; computed on reader (slug) views only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
    /// Chapters in reading order.
    pub chapters: Vec<ChapterSummary>,
}

/// Author dashboard row.
#[derive(Debug, Clone, Serialize)]
pub struct OwnBook {
    /// Book ID.
    pub id: String,
    /// Book title.
    pub title: String,
    /// Category.
    pub category: String,
    /// Whether the book is published.
    pub is_published: bool,
    /// Count of all chapters.
    pub chapters_total: i64,
    /// Count of published chapters.
    pub chapters_published: i64,
}

/// Published book row inside a public user profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileBook {
    /// Book ID.
    pub id: String,
    /// Book title.
    pub title: String,
    /// Book slug.
    pub slug: String,
    /// Category.
    pub category: String,
    /// Cover asset path.
    pub cover_path: Option<String>,
    /// Mean rating, 0 when unrated.
    pub avg_rate: f64,
    /// Whether the profile owner favorited their own book.
    pub favorite: bool,
}

/// Public user profile with published books.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Profile description.
    pub description: Option<String>,
    /// Avatar path.
    pub avatar_path: Option<String>,
    /// Twitter profile URL.
    pub twitter: Option<String>,
    /// Facebook profile URL.
    pub facebook: Option<String>,
    /// The user's published books.
    pub books: Vec<ProfileBook>,
}

/// Minimal user projection for admin listings.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Role.
    pub role: crate::db::Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_produces_no_sql() {
        let filter = BookFilter::default();
        assert_eq!(filter.filter_sql(), "");
        assert!(filter.filter_params().is_empty());
        assert!(filter.is_empty());
    }

    #[test]
    fn category_filter_uses_in_clause() {
        let filter = BookFilter {
            categories: vec!["novel".into(), "poetry".into()],
            ..Default::default()
        };
        assert_eq!(filter.filter_sql(), " AND b.category IN (?,?)");
        assert_eq!(filter.filter_params(), vec!["novel", "poetry"]);
    }

    #[test]
    fn tag_filter_uses_exists_subquery() {
        let filter = BookFilter {
            tags: vec!["dragons".into()],
            ..Default::default()
        };
        let sql = filter.filter_sql();
        assert!(sql.contains("EXISTS"));
        assert!(sql.contains("book_tags"));
        assert_eq!(filter.filter_params(), vec!["dragons"]);
    }

    #[test]
    fn text_filter_binds_pattern_twice() {
        let filter = BookFilter {
            text: Some("moulin".into()),
            ..Default::default()
        };
        assert!(filter.filter_sql().contains("LIKE"));
        assert_eq!(filter.filter_params(), vec!["%moulin%", "%moulin%"]);
    }

    #[test]
    fn combined_filters_keep_param_order() {
        let filter = BookFilter {
            tags: vec!["sea".into()],
            categories: vec!["novel".into()],
            text: Some("ship".into()),
        };
        // Categories bind first, then tags, then the text pattern twice.
        assert_eq!(
            filter.filter_params(),
            vec!["novel", "sea", "%ship%", "%ship%"]
        );
        let sql = filter.filter_sql();
        let cat = sql.find("b.category").unwrap();
        let tag = sql.find("book_tags").unwrap();
        let text = sql.find("LIKE").unwrap();
        assert!(cat < tag && tag < text);
    }

    #[test]
    fn page_is_one_indexed() {
        assert_eq!(Page(1).limit_offset(), (6, 0));
        assert_eq!(Page(3).limit_offset(), (6, 12));
        // Page 0 is treated as page 1.
        assert_eq!(Page(0).limit_offset(), (6, 0));
    }

    #[test]
    fn sort_modes() {
        assert_eq!(BookSort::from_query("popularity"), BookSort::Popularity);
        assert_eq!(BookSort::from_query("favorite"), BookSort::Favorite);
        assert_eq!(BookSort::from_query("anything"), BookSort::Recent);
        assert!(BookSort::Popularity.order_sql().starts_with("avg_rate DESC"));
    }
}
