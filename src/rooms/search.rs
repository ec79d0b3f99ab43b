use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use time::{macros::format_description, Date, Duration as TimeDuration, Time};

use crate::{
    auth::AuthUser,
    db::{self, ChannelId, MessageRow, UserId},
    AppError, AppResult,
};

use super::room::{MessageView, MESSAGE_COLUMNS};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchQuery {
    q: Option<String>,
    from: Option<String>,
    to: Option<String>,
    user: Option<String>,
    limit: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub message: MessageView,
    pub highlights: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub results: Vec<SearchHit>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// Validated search parameters.
#[derive(Debug, Default, PartialEq, Eq)]
struct Filters {
    term: Option<String>,
    since: Option<i64>,
    until: Option<i64>,
    sender: Option<UserId>,
}

fn day_start(raw: &str, field: &str) -> AppResult<i64> {
    let date = Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        AppError::bad_request(format!("Invalid date format for '{field}'. Use YYYY-MM-DD"))
    })?;
    Ok(date.with_time(Time::MIDNIGHT).assume_utc().unix_timestamp())
}

impl Filters {
    fn parse(query: &SearchQuery) -> AppResult<Self> {
        let term = query
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_owned);
        let since = query.from.as_deref().map(|d| day_start(d, "from")).transpose()?;
        let until = query
            .to
            .as_deref()
            .map(|d| day_start(d, "to").map(|t| t + TimeDuration::DAY.whole_seconds()))
            .transpose()?;
        let sender = query
            .user
            .as_deref()
            .map(|u| u.trim().parse::<UserId>().map_err(|_| AppError::bad_request("Invalid user ID")))
            .transpose()?;

        Ok(Filters { term, since, until, sender })
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>, channel_id: ChannelId) {
        qb.push(" WHERE m.channel_id=").push_bind(channel_id);
        if let Some(term) = &self.term {
            qb.push(" AND instr(lower(m.content), lower(").push_bind(term.clone()).push(")) > 0");
        }
        if let Some(since) = self.since {
            qb.push(" AND m.timestamp>=").push_bind(since);
        }
        if let Some(until) = self.until {
            qb.push(" AND m.timestamp<").push_bind(until);
        }
        if let Some(sender) = self.sender {
            qb.push(" AND m.sender_id=").push_bind(sender);
        }
    }
}

fn parse_positive(raw: Option<&str>, default: i64, field: &str) -> AppResult<i64> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| AppError::bad_request(format!("Invalid {field}"))),
    }
}

fn page_offset(page: i64, page_size: i64) -> AppResult<i64> {
    (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| AppError::bad_request("Invalid page"))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn search_messages(
    Path(channel_id): Path<ChannelId>,
    Query(query): Query<SearchQuery>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<SearchPage>> {
    if !db::is_channel_member(&db_pool, channel_id, user.id).await? {
        return Err(AppError::forbidden("Channel not found or access denied"));
    }

    let filters = Filters::parse(&query)?;
    let page_size = parse_positive(query.limit.as_deref(), DEFAULT_PAGE_SIZE, "limit")?.min(MAX_PAGE_SIZE);
    let page = parse_positive(query.page.as_deref(), 1, "page")?;
    let offset = page_offset(page, page_size)?;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM messages m");
    filters.push_where(&mut count, channel_id);
    let (total,): (i64,) = count.build_query_as().fetch_one(&db_pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id=m.sender_id"
    ));
    filters.push_where(&mut select, channel_id);
    select
        .push(" ORDER BY m.timestamp DESC, m.id DESC LIMIT ")
        .push_bind(page_size)
        .push(" OFFSET ")
        .push_bind(offset);
    let rows: Vec<MessageRow> = select.build_query_as().fetch_all(&db_pool).await?;

    let results = rows
        .into_iter()
        .map(|row| {
            let highlights = filters
                .term
                .as_deref()
                .map(|term| vec![highlight(&row.content, term)])
                .unwrap_or_default();
            SearchHit { message: row.into(), highlights }
        })
        .collect();

    Ok(Json(SearchPage { results, total, page, page_size }))
}

/// Wraps every case-insensitive occurrence of each whitespace-separated
/// term in `<mark>`, merging overlapping or touching ranges.
pub fn highlight(content: &str, query: &str) -> String {
    // ASCII folding keeps byte offsets identical between the two strings
    let folded = content.to_ascii_lowercase();
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    for term in query.split_whitespace() {
        let term = term.to_ascii_lowercase();
        let mut start = 0;
        while let Some(idx) = folded[start..].find(&term) {
            let begin = start + idx;
            let end = begin + term.len();
            ranges.push((begin, end));
            start = end;
        }
    }
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut out = String::with_capacity(content.len() + merged.len() * 13);
    let mut last = 0;
    for (start, end) in merged {
        out.push_str(&content[last..start]);
        out.push_str("<mark>");
        out.push_str(&content[start..end]);
        out.push_str("</mark>");
        last = end;
    }
    out.push_str(&content[last..]);
    out
}
