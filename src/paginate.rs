//! Paging for list-style tool results (console messages, network requests).

use serde::Deserialize;

use crate::budget::check_budget;

/// Most page hints listed when a full listing is over budget.
pub const MAX_PAGE_HINTS: usize = 5;

/// Caller-supplied bounds. Both absent means "give me everything".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageRequest {
    pub fn is_unbounded(&self) -> bool {
        self.limit.is_none() && self.offset.is_none()
    }
}

/// Renders `items` as one line each, paged according to `request`.
///
/// Without bounds the whole list is rendered; if that is over budget, the
/// listing is replaced by advice naming concrete `{limit, offset}` pairs.
/// With bounds, the slice `[offset, offset + limit)` is returned along with
/// a hint for the next page when items remain.
pub fn paginate<T>(
    items: &[T],
    noun: &str,
    render: impl Fn(&T) -> String,
    request: PageRequest,
) -> String {
    let total = items.len();

    if request.is_unbounded() {
        if total == 0 {
            return format!("No {} found.", noun);
        }
        let full = items.iter().map(&render).collect::<Vec<_>>().join("\n");
        let check = check_budget(&full);
        let Some(total_pages) = check.total_pages.filter(|_| check.over_limit) else {
            return full;
        };
        return pagination_advice(total, noun, total_pages, check.message);
    }

    let offset = request.offset.unwrap_or(0);
    let limit = request
        .limit
        .unwrap_or_else(|| total.saturating_sub(offset));
    if offset >= total || limit == 0 {
        return format!(
            "No {} found in range offset={}, limit={} (total: {}).",
            noun, offset, limit, total
        );
    }

    let end = offset.saturating_add(limit).min(total);
    let listing = items[offset..end]
        .iter()
        .map(&render)
        .collect::<Vec<_>>()
        .join("\n");
    let mut text = format!(
        "Showing {} {}-{} of {}:\n{}",
        noun,
        offset + 1,
        end,
        total,
        listing
    );
    if end < total {
        text.push_str(&format!(
            "\n\nMore {} available. Next page: {{\"limit\": {}, \"offset\": {}}}",
            noun, limit, end
        ));
    }
    text
}

fn pagination_advice(
    total: usize,
    noun: &str,
    total_pages: usize,
    budget_message: Option<String>,
) -> String {
    let page_size = total.div_ceil(total_pages);
    let mut lines = Vec::new();
    if let Some(message) = budget_message {
        lines.push(message);
    }
    lines.push(format!(
        "The full list of {} {} is too large to return at once. \
         Call this tool again with one of these parameter sets:",
        total, noun
    ));
    for page in 0..total_pages.min(MAX_PAGE_HINTS) {
        lines.push(format!(
            "- Page {}: {{\"limit\": {}, \"offset\": {}}}",
            page + 1,
            page_size,
            page * page_size
        ));
    }
    if total_pages > MAX_PAGE_HINTS {
        lines.push(format!(
            "- ... and {} more pages",
            total_pages - MAX_PAGE_HINTS
        ));
    }
    lines.join("\n")
}
