//! Announcement types and the filter used to query them

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{now_millis, AnnouncementId, UserId};
use crate::error::FeedError;

/// Announcement category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Academic,
    Event,
    Sport,
    #[serde(rename = "Student Affairs")]
    StudentAffairs,
    Urgent,
    General,
    Administrative,
}

impl Category {
    /// Every category, in display order
    pub const ALL: [Category; 7] = [
        Category::Academic,
        Category::Event,
        Category::Sport,
        Category::StudentAffairs,
        Category::Urgent,
        Category::General,
        Category::Administrative,
    ];

    /// Name as stored by the platform
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Academic => "Academic",
            Category::Event => "Event",
            Category::Sport => "Sport",
            Category::StudentAffairs => "Student Affairs",
            Category::Urgent => "Urgent",
            Category::General => "General",
            Category::Administrative => "Administrative",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FeedError::ValidationRejected(format!("unknown category: {}", s)))
    }
}

/// Announcement priority, ordered from least to most pressing
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(FeedError::ValidationRejected(format!(
                "unknown priority: {}",
                other
            ))),
        }
    }
}

/// A published announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: AnnouncementId,
    pub title: String,
    pub excerpt: String,
    pub body: String,
    pub category: Category,
    /// Department tag, e.g. "Computer Science"
    pub department: String,
    pub priority: Priority,
    pub author_id: UserId,
    /// Unix timestamp (milliseconds) of publication
    pub published_at: i64,
    pub image_url: Option<String>,
    /// Soft-deleted announcements are never returned by queries
    pub is_deleted: bool,
}

impl Announcement {
    /// Create a new announcement published now
    pub fn new(
        title: impl Into<String>,
        category: Category,
        department: impl Into<String>,
        author_id: UserId,
    ) -> Self {
        let title = title.into();
        Self {
            id: AnnouncementId::new(),
            excerpt: title.clone(),
            title,
            body: String::new(),
            category,
            department: department.into(),
            priority: Priority::default(),
            author_id,
            published_at: now_millis(),
            image_url: None,
            is_deleted: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_body(mut self, excerpt: impl Into<String>, body: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self.body = body.into();
        self
    }

    pub fn with_published_at(mut self, published_at: i64) -> Self {
        self.published_at = published_at;
        self
    }

    /// The subset of fields joined onto bookmark rows
    pub fn summary(&self) -> AnnouncementSummary {
        AnnouncementSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            excerpt: self.excerpt.clone(),
            category: self.category,
            department: self.department.clone(),
            published_at: self.published_at,
            image_url: self.image_url.clone(),
        }
    }
}

/// Announcement fields shown alongside a bookmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementSummary {
    pub id: AnnouncementId,
    pub title: String,
    pub excerpt: String,
    pub category: Category,
    pub department: String,
    pub published_at: i64,
    pub image_url: Option<String>,
}

/// Query parameters for an announcement fetch
///
/// Also the parameter half of the announcement cache key, so two views using
/// equal filters share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnouncementFilter {
    pub category: Option<Category>,
    pub department: Option<String>,
    pub priority: Option<Priority>,
    pub limit: usize,
}

impl Default for AnnouncementFilter {
    fn default() -> Self {
        Self {
            category: None,
            department: None,
            priority: None,
            limit: crate::config::DEFAULT_ANNOUNCEMENT_LIMIT,
        }
    }
}

impl AnnouncementFilter {
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether an announcement belongs in this filter's result set
    pub fn matches(&self, announcement: &Announcement) -> bool {
        if announcement.is_deleted {
            return false;
        }
        if self.category.is_some_and(|c| c != announcement.category) {
            return false;
        }
        if self
            .department
            .as_deref()
            .is_some_and(|d| d != announcement.department)
        {
            return false;
        }
        if self.priority.is_some_and(|p| p != announcement.priority) {
            return false;
        }
        true
    }

    /// Filter, order newest first, and truncate to the page size
    pub fn apply<'a>(
        &self,
        announcements: impl IntoIterator<Item = &'a Announcement>,
    ) -> Vec<Announcement> {
        let mut selected: Vec<Announcement> = announcements
            .into_iter()
            .filter(|a| self.matches(a))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        selected.truncate(self.limit);
        selected
    }
}

impl fmt::Display for AnnouncementFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        if let Some(category) = &self.category {
            write!(f, "category={},", category)?;
        }
        if let Some(department) = &self.department {
            write!(f, "department={},", department)?;
        }
        if let Some(priority) = &self.priority {
            write!(f, "priority={},", priority)?;
        }
        write!(f, "limit={}}}", self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(category: Category, published_at: i64) -> Announcement {
        Announcement::new("Exam timetable", category, "Computer Science", UserId::new())
            .with_published_at(published_at)
    }

    #[test]
    fn test_category_serde_uses_display_names() {
        let json = serde_json::to_string(&Category::StudentAffairs).unwrap();
        assert_eq!(json, "\"Student Affairs\"");
        let parsed: Category = serde_json::from_str("\"Urgent\"").unwrap();
        assert_eq!(parsed, Category::Urgent);
    }

    #[test]
    fn test_category_from_str_is_case_insensitive() {
        assert_eq!("student affairs".parse::<Category>().unwrap(), Category::StudentAffairs);
        assert!("Cooking".parse::<Category>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Low < Priority::Medium);
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
    }

    #[test]
    fn test_filter_excludes_soft_deleted() {
        let mut announcement = sample(Category::Event, 1);
        let filter = AnnouncementFilter::default();
        assert!(filter.matches(&announcement));

        announcement.is_deleted = true;
        assert!(!filter.matches(&announcement));
    }

    #[test]
    fn test_filter_matches_all_fields() {
        let announcement = sample(Category::Urgent, 1).with_priority(Priority::High);

        assert!(AnnouncementFilter::default()
            .category(Category::Urgent)
            .department("Computer Science")
            .priority(Priority::High)
            .matches(&announcement));
        assert!(!AnnouncementFilter::default()
            .category(Category::Sport)
            .matches(&announcement));
        assert!(!AnnouncementFilter::default()
            .department("Business")
            .matches(&announcement));
    }

    #[test]
    fn test_apply_orders_newest_first_and_limits() {
        let items = vec![
            sample(Category::General, 10),
            sample(Category::General, 30),
            sample(Category::General, 20),
        ];
        let page = AnnouncementFilter::default().limit(2).apply(&items);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].published_at, 30);
        assert_eq!(page[1].published_at, 20);
    }

    #[test]
    fn test_filter_display() {
        let filter = AnnouncementFilter::default().category(Category::Urgent).limit(5);
        assert_eq!(filter.to_string(), "{category=Urgent,limit=5}");
    }
}
