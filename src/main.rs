#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use aes_gcm::aead::{rand_core::RngCore, Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::cmp::Ordering;
use std::fs;
use std::iter::Peekable;
use std::path::PathBuf;
use std::str::Chars;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tauri::{AppHandle, Manager};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_opener::OpenerExt;
use tracing::{error, info, warn};

const AUTH_FILE: &str = "auth.json";
const ROSTER_FILE: &str = "roster.enc";
const DEFAULT_PBKDF2_ITERATIONS: u32 = 200_000;

// Accepted aliases in the raw roster document, first present wins.
const ROSTER_LIST_FIELDS: [&str; 2] = ["students", "list"];
const READING_FIELDS: [&str; 2] = ["kana", "reading"];

const CLASS_SUFFIX: char = '組';

const EXPORT_COLUMNS: [&str; 4] = ["number", "class", "name", "reading"];

// Jump button base colors keyed by the numeric portion of the class label.
const CLASS_BASE_COLORS: [(&str, &str, &str); 8] = [
    ("1", "#e0e0e0", "#111827"),
    ("2", "#222222", "#ffffff"),
    ("3", "#e53935", "#ffffff"),
    ("4", "#2196f3", "#ffffff"),
    ("5", "#fbc02d", "#111827"),
    ("6", "#43a047", "#ffffff"),
    ("7", "#ff9800", "#ffffff"),
    ("8", "#f06292", "#ffffff"),
];
const DEFAULT_JUMP_COLOR: (&str, &str) = ("#6B7280", "#ffffff");

// Full-width katakana fold range; each code point maps to hiragana at -0x60.
const KATAKANA_FOLD_START: char = '\u{30A1}';
const KATAKANA_FOLD_END: char = '\u{30F6}';
const KANA_FOLD_OFFSET: u32 = 0x60;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SortCriteria {
    Class,
    Reading,
}

impl SortCriteria {
    fn parse(value: &str) -> SortCriteria {
        match value.trim() {
            "reading" => SortCriteria::Reading,
            _ => SortCriteria::Class,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SortCriteria::Class => "class",
            SortCriteria::Reading => "reading",
        }
    }
}

/// One roster entry, immutable once mapped. The normalized fields are matching
/// keys derived from the display fields by `normalize_text`.
#[derive(Clone, Debug)]
struct Profile {
    number: i64,
    class_label: String,
    name: String,
    reading: String,
    norm_name: String,
    norm_reading: String,
    norm_class: String,
    norm_number: String,
}

#[derive(Default)]
struct RosterState {
    profiles: Vec<Profile>,
    class_names: Vec<String>,
    total: usize,
    loaded: bool,
}

#[derive(Clone)]
struct ViewState {
    term: String,
    criteria: SortCriteria,
    ascending: bool,
}

impl Default for ViewState {
    fn default() -> ViewState {
        ViewState {
            term: String::new(),
            criteria: SortCriteria::Class,
            ascending: true,
        }
    }
}

// Size-1 slot coalescing rapid search input; the latest pending term wins.
#[derive(Default)]
struct PendingQuery {
    term: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CryptoEnvelope {
    v: u8,
    salt: String,
    iv: String,
    tag: String,
    data: String,
}

#[derive(Serialize, Deserialize)]
struct AuthRecord {
    salt: String,
    hash: String,
    #[serde(default = "default_pbkdf2_iterations")]
    iterations: u32,
}

#[derive(Deserialize)]
struct AuthSetupRequest {
    password: String,
    iterations: Option<u32>,
}

#[derive(Deserialize)]
struct AuthVerifyRequest {
    password: String,
}

#[derive(Deserialize)]
struct AuthChangeRequest {
    current: String,
    next: String,
    iterations: Option<u32>,
}

#[derive(Deserialize)]
struct RosterLoadRequest {
    password: String,
}

#[derive(Deserialize)]
struct RosterImportRequest {
    password: String,
}

#[derive(Deserialize)]
struct QueryBufferRequest {
    term: String,
}

#[derive(Deserialize)]
struct SortCriteriaRequest {
    criteria: String,
}

#[derive(Deserialize)]
struct ExportCsvRequest {
    filename: String,
}

#[derive(Deserialize)]
struct SaveCsvRequest {
    filename: String,
    content: String,
}

#[derive(Deserialize)]
struct ClipboardWriteRequest {
    text: String,
}

#[derive(Serialize)]
struct SaveCsvResult {
    ok: bool,
    canceled: bool,
    filename: String,
    path: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct StorageInfoResult {
    ok: bool,
    path_label: String,
}

#[derive(Serialize, Clone)]
struct RosterCard {
    number: i64,
    number_label: String,
    class_label: String,
    class_number: String,
    name: String,
    reading: String,
    jump_anchor: Option<String>,
}

#[derive(Serialize, Clone)]
struct JumpButton {
    class_label: String,
    class_number: String,
    anchor: String,
    base_color: String,
    text_color: String,
}

enum RosterDocument {
    Found(serde_json::Value),
    Missing,
    Broken,
}

fn roster_state() -> &'static Mutex<RosterState> {
    static STATE: OnceLock<Mutex<RosterState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(RosterState::default()))
}

fn view_state() -> &'static Mutex<ViewState> {
    static STATE: OnceLock<Mutex<ViewState>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(ViewState::default()))
}

fn pending_query() -> &'static Mutex<PendingQuery> {
    static STATE: OnceLock<Mutex<PendingQuery>> = OnceLock::new();
    STATE.get_or_init(|| Mutex::new(PendingQuery::default()))
}

fn lock_state<T>(mutex: &'static Mutex<T>) -> Result<MutexGuard<'static, T>, String> {
    mutex.lock().map_err(|_| "State lock poisoned.".to_string())
}

/* ============================================================
 * Commands: app glue
 * ============================================================ */

#[tauri::command]
fn app_version(app: AppHandle) -> String {
    app.package_info().version.to_string()
}

#[tauri::command]
fn platform_name() -> String {
    match std::env::consts::OS {
        "windows" => "win32",
        "macos" => "darwin",
        "android" => "android",
        _ => "linux",
    }
    .to_string()
}

#[tauri::command]
fn storage_info(app: AppHandle) -> Result<StorageInfoResult, String> {
    let root = storage_root_dir(&app)?;
    Ok(StorageInfoResult {
        ok: true,
        path_label: root.to_string_lossy().to_string(),
    })
}

#[tauri::command]
fn open_storage_folder(app: AppHandle) -> Result<bool, String> {
    let root = storage_root_dir(&app)?;
    app.opener()
        .open_url(root.to_string_lossy().to_string(), Option::<String>::None)
        .map_err(|err| err.to_string())?;
    Ok(true)
}

#[tauri::command]
fn clipboard_write(app: AppHandle, payload: ClipboardWriteRequest) -> Result<bool, String> {
    app.clipboard()
        .write_text(payload.text)
        .map_err(|err| err.to_string())?;
    Ok(true)
}

/* ============================================================
 * Commands: identity gate
 * ============================================================ */

#[tauri::command]
fn auth_read(app: AppHandle) -> Result<serde_json::Value, String> {
    let configured = read_auth_record(&app)?.is_some();
    Ok(json!({ "configured": configured }))
}

#[tauri::command]
fn auth_setup(app: AppHandle, payload: AuthSetupRequest) -> Result<bool, String> {
    let password = payload.password;
    if password.is_empty() {
        return Err("Password is required.".to_string());
    }
    let iterations = payload
        .iterations
        .unwrap_or(DEFAULT_PBKDF2_ITERATIONS)
        .max(1);
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(password.as_str(), &salt, iterations);
    let record = AuthRecord {
        salt: encode_b64(&salt),
        hash: encode_b64(key.as_slice()),
        iterations,
    };
    write_auth_record(&app, &record)?;
    info!("passphrase configured");
    Ok(true)
}

#[tauri::command]
fn auth_verify(app: AppHandle, payload: AuthVerifyRequest) -> Result<bool, String> {
    verify_auth_password(&app, payload.password.as_str())
}

#[tauri::command]
fn auth_change(app: AppHandle, payload: AuthChangeRequest) -> Result<bool, String> {
    let Some(current_record) = read_auth_record(&app)? else {
        return Ok(false);
    };
    if payload.current.is_empty() || payload.next.is_empty() {
        return Ok(false);
    }
    if !verify_password_record(&current_record, payload.current.as_str()) {
        return Ok(false);
    }

    // The roster document is keyed to the passphrase, so carry it over.
    if let RosterDocument::Found(document) = read_roster_document(&app, payload.current.as_str())?
    {
        write_roster_document(&app, payload.next.as_str(), &document)?;
    }

    let iterations = payload
        .iterations
        .unwrap_or(current_record.iterations)
        .max(1);
    let mut new_salt = [0u8; 16];
    OsRng.fill_bytes(&mut new_salt);
    let new_key = derive_key(payload.next.as_str(), &new_salt, iterations);
    let next_record = AuthRecord {
        salt: encode_b64(&new_salt),
        hash: encode_b64(new_key.as_slice()),
        iterations,
    };
    write_auth_record(&app, &next_record)?;
    info!("passphrase changed");
    Ok(true)
}

/* ============================================================
 * Commands: roster loading and import
 * ============================================================ */

#[tauri::command]
fn roster_load(app: AppHandle, payload: RosterLoadRequest) -> Result<serde_json::Value, String> {
    if !verify_auth_password(&app, payload.password.as_str())? {
        return Ok(json!({ "ok": false, "code": "password" }));
    }

    {
        let state = lock_state(roster_state())?;
        if state.loaded {
            // A second start signal after a successful load is a no-op.
            return Ok(json!({
                "ok": true,
                "already": true,
                "total": state.total,
                "classNames": state.class_names,
            }));
        }
    }

    match read_roster_document(&app, payload.password.as_str()) {
        Ok(RosterDocument::Found(document)) => {
            let profiles = map_roster_document(&document);
            let out = commit_roster(profiles)?;
            info!(total = value_usize(out.get("total")), "roster loaded");
            Ok(out)
        }
        Ok(RosterDocument::Missing) => {
            reset_roster_state()?;
            warn!("roster document missing");
            Ok(json!({ "ok": false, "code": "not_found", "total": 0 }))
        }
        Ok(RosterDocument::Broken) => {
            reset_roster_state()?;
            warn!("roster document unreadable");
            Ok(json!({ "ok": false, "code": "broken", "total": 0 }))
        }
        Err(err) => {
            reset_roster_state()?;
            error!(error = err.as_str(), "roster load failed");
            Ok(json!({ "ok": false, "code": "config", "error": err, "total": 0 }))
        }
    }
}

#[tauri::command]
fn roster_import(app: AppHandle, payload: RosterImportRequest) -> Result<serde_json::Value, String> {
    if !verify_auth_password(&app, payload.password.as_str())? {
        return Ok(json!({ "ok": false, "code": "password" }));
    }

    let picked = rfd::FileDialog::new()
        .add_filter("Roster Document", &["enc", "json"])
        .pick_file();
    let Some(path) = picked else {
        return Ok(json!({ "ok": false, "canceled": true }));
    };

    let raw = fs::read_to_string(&path).map_err(|err| err.to_string())?;
    let Some(document) = parse_import_document(raw.as_str(), payload.password.as_str())? else {
        warn!("import file rejected");
        return Ok(json!({ "ok": false, "code": "broken" }));
    };

    write_roster_document(&app, payload.password.as_str(), &document)?;
    let profiles = map_roster_document(&document);
    let out = commit_roster(profiles)?;
    info!(total = value_usize(out.get("total")), "roster imported");
    Ok(out)
}

/* ============================================================
 * Commands: view state and rendering
 * ============================================================ */

#[tauri::command]
fn roster_query_buffer(payload: QueryBufferRequest) -> Result<(), String> {
    let mut pending = lock_state(pending_query())?;
    pending.term = Some(payload.term);
    Ok(())
}

#[tauri::command]
fn roster_query_commit() -> Result<serde_json::Value, String> {
    let taken = {
        let mut pending = lock_state(pending_query())?;
        commit_pending(&mut pending)
    };
    let Some(term) = taken else {
        return Ok(json!({ "committed": false }));
    };
    lock_state(view_state())?.term = term.clone();
    Ok(json!({ "committed": true, "term": term }))
}

#[tauri::command]
fn roster_set_sort(payload: SortCriteriaRequest) -> Result<serde_json::Value, String> {
    let criteria = SortCriteria::parse(payload.criteria.as_str());
    lock_state(view_state())?.criteria = criteria;
    Ok(json!({ "criteria": criteria.as_str() }))
}

#[tauri::command]
fn roster_toggle_direction() -> Result<serde_json::Value, String> {
    let mut view = lock_state(view_state())?;
    view.ascending = !view.ascending;
    Ok(json!({ "ascending": view.ascending }))
}

#[tauri::command]
fn roster_render() -> Result<serde_json::Value, String> {
    let view = lock_state(view_state())?.clone();
    let state = lock_state(roster_state())?;
    Ok(render_view(&state, &view))
}

#[tauri::command]
fn roster_export_csv(payload: ExportCsvRequest) -> Result<SaveCsvResult, String> {
    let rows: Vec<serde_json::Value> = {
        let view = lock_state(view_state())?.clone();
        let state = lock_state(roster_state())?;
        let filtered = filter_profiles(&state.profiles, view.term.as_str());
        let sorted = sort_profiles(filtered, view.criteria, view.ascending);
        sorted
            .iter()
            .map(|profile| {
                json!({
                    "number": format!("{:03}", profile.number),
                    "class": profile.class_label,
                    "name": profile.name,
                    "reading": profile.reading,
                })
            })
            .collect()
    };
    let columns: Vec<String> = EXPORT_COLUMNS.iter().map(|col| col.to_string()).collect();
    let csv = rows_to_csv(columns.as_slice(), rows.as_slice());
    info!(rows = rows.len(), "exporting roster view");
    save_csv_file(SaveCsvRequest {
        filename: sanitize_export_filename(payload.filename.as_str()),
        content: csv,
    })
}

#[tauri::command]
fn save_csv_file(payload: SaveCsvRequest) -> Result<SaveCsvResult, String> {
    let default_name = sanitize_filename(payload.filename.as_str());
    let path = rfd::FileDialog::new()
        .set_file_name(default_name.as_str())
        .save_file();

    let Some(path) = path else {
        return Ok(SaveCsvResult {
            ok: false,
            canceled: true,
            filename: default_name,
            path: None,
            error: None,
        });
    };

    write_text_file(path.clone(), payload.content.as_str())?;
    Ok(SaveCsvResult {
        ok: true,
        canceled: false,
        filename: default_name,
        path: Some(path.to_string_lossy().to_string()),
        error: None,
    })
}

/* ============================================================
 * Normalization
 * ============================================================ */

/// Canonical matching key: all whitespace stripped (full-width space
/// included), katakana folded to hiragana, lowercased. Idempotent.
fn normalize_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_whitespace() {
            continue;
        }
        let folded = match ch {
            KATAKANA_FOLD_START..=KATAKANA_FOLD_END => {
                char::from_u32(ch as u32 - KANA_FOLD_OFFSET).unwrap_or(ch)
            }
            _ => ch,
        };
        for lowered in folded.to_lowercase() {
            out.push(lowered);
        }
    }
    out
}

/* ============================================================
 * Roster mapping
 * ============================================================ */

fn roster_records(document: &serde_json::Value) -> Vec<serde_json::Value> {
    for field in ROSTER_LIST_FIELDS {
        if let Some(rows) = document.get(field).and_then(|v| v.as_array()) {
            return rows.clone();
        }
    }
    Vec::new()
}

fn map_roster_document(document: &serde_json::Value) -> Vec<Profile> {
    roster_records(document)
        .iter()
        .map(map_roster_record)
        .collect()
}

fn map_roster_record(record: &serde_json::Value) -> Profile {
    let number = coerce_number(record.get("number"));
    let class_label = class_label_from_value(record.get("class"));
    let name = record
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let reading = first_reading(record);

    Profile {
        norm_name: normalize_text(name.as_str()),
        norm_reading: normalize_text(reading.as_str()),
        norm_class: normalize_text(class_label.as_str()),
        norm_number: normalize_text(raw_number_text(record.get("number")).as_str()),
        number,
        class_label,
        name,
        reading,
    }
}

fn coerce_number(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(v) => {
            if let Some(num) = v.as_i64() {
                num
            } else if let Some(num) = v.as_f64() {
                num as i64
            } else if let Some(text) = v.as_str() {
                text.trim().parse::<i64>().unwrap_or(0)
            } else {
                0
            }
        }
        None => 0,
    }
}

fn raw_number_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

fn class_label_from_value(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(v) if v.is_number() => {
            if let Some(num) = v.as_i64() {
                format!("{num}{CLASS_SUFFIX}")
            } else {
                format!("{v}{CLASS_SUFFIX}")
            }
        }
        Some(v) => v.as_str().unwrap_or("").to_string(),
        None => String::new(),
    }
}

fn first_reading(record: &serde_json::Value) -> String {
    for field in READING_FIELDS {
        if let Some(text) = record.get(field).and_then(|v| v.as_str()) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    String::new()
}

fn distinct_class_names(profiles: &[Profile]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for profile in profiles {
        if !names.iter().any(|name| name == &profile.class_label) {
            names.push(profile.class_label.clone());
        }
    }
    names.sort_by_key(|label| class_sort_key(label.as_str()));
    names
}

/* ============================================================
 * Filtering
 * ============================================================ */

fn query_tokens(term: &str) -> Vec<String> {
    term.split_whitespace()
        .map(normalize_text)
        .filter(|token| !token.is_empty())
        .collect()
}

fn profile_matches_token(profile: &Profile, token: &str) -> bool {
    profile.norm_name.contains(token)
        || profile.norm_reading.contains(token)
        || profile.norm_class.contains(token)
        || profile.norm_number.contains(token)
}

/// AND across tokens, OR across the four normalized fields. An empty or
/// whitespace-only term keeps the input unchanged.
fn filter_profiles<'a>(profiles: &'a [Profile], term: &str) -> Vec<&'a Profile> {
    let tokens = query_tokens(term);
    if tokens.is_empty() {
        return profiles.iter().collect();
    }
    profiles
        .iter()
        .filter(|profile| {
            tokens
                .iter()
                .all(|token| profile_matches_token(profile, token.as_str()))
        })
        .collect()
}

/* ============================================================
 * Sorting
 * ============================================================ */

fn class_number_text(label: &str) -> String {
    label.replace(CLASS_SUFFIX, "")
}

fn class_sort_key(label: &str) -> i64 {
    class_number_text(label).trim().parse::<i64>().unwrap_or(0)
}

fn take_digit_run(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(ch) = chars.peek().copied() {
        if !ch.is_ascii_digit() {
            break;
        }
        run.push(ch);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let left = a.trim_start_matches('0');
    let right = b.trim_start_matches('0');
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

/// Case/width-insensitive reading comparison; embedded digit runs compare by
/// numeric value rather than lexicographically.
fn compare_readings(a: &str, b: &str) -> Ordering {
    let left = normalize_text(a);
    let right = normalize_text(b);
    let mut lhs = left.chars().peekable();
    let mut rhs = right.chars().peekable();
    loop {
        match (lhs.peek().copied(), rhs.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(lc), Some(rc)) => {
                if lc.is_ascii_digit() && rc.is_ascii_digit() {
                    let left_run = take_digit_run(&mut lhs);
                    let right_run = take_digit_run(&mut rhs);
                    let by_value = compare_digit_runs(left_run.as_str(), right_run.as_str());
                    if by_value != Ordering::Equal {
                        return by_value;
                    }
                } else {
                    let ord = lc.cmp(&rc);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    lhs.next();
                    rhs.next();
                }
            }
        }
    }
}

fn compare_class_then_number_then_reading(a: &Profile, b: &Profile) -> Ordering {
    class_sort_key(a.class_label.as_str())
        .cmp(&class_sort_key(b.class_label.as_str()))
        .then_with(|| a.number.cmp(&b.number))
        .then_with(|| compare_readings(a.reading.as_str(), b.reading.as_str()))
}

fn compare_reading_then_number(a: &Profile, b: &Profile) -> Ordering {
    compare_readings(a.reading.as_str(), b.reading.as_str())
        .then_with(|| a.number.cmp(&b.number))
}

/// Direction flips the sign of the composite comparison, so descending is the
/// exact reverse of the ascending total order.
fn sort_profiles(
    mut profiles: Vec<&Profile>,
    criteria: SortCriteria,
    ascending: bool,
) -> Vec<&Profile> {
    profiles.sort_by(|a, b| {
        let base = match criteria {
            SortCriteria::Class => compare_class_then_number_then_reading(a, b),
            SortCriteria::Reading => compare_reading_then_number(a, b),
        };
        if ascending {
            base
        } else {
            base.reverse()
        }
    });
    profiles
}

/* ============================================================
 * Card assembly and jump navigation
 * ============================================================ */

fn build_cards(profiles: &[&Profile], criteria: SortCriteria, term: &str) -> Vec<RosterCard> {
    // Jump anchors only exist in the full class-ordered view.
    let mark_anchors = criteria == SortCriteria::Class && term.is_empty();
    let mut last_class: Option<&str> = None;
    let mut cards = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let class_number = class_number_text(profile.class_label.as_str());
        let mut jump_anchor = None;
        if mark_anchors && last_class != Some(profile.class_label.as_str()) {
            jump_anchor = Some(format!("class-start-{class_number}"));
            last_class = Some(profile.class_label.as_str());
        }
        cards.push(RosterCard {
            number: profile.number,
            number_label: format!("{:03}", profile.number),
            class_label: profile.class_label.clone(),
            class_number,
            name: profile.name.clone(),
            reading: profile.reading.clone(),
            jump_anchor,
        });
    }
    cards
}

fn jump_color(class_number: &str) -> (&'static str, &'static str) {
    for (key, base, text) in CLASS_BASE_COLORS {
        if key == class_number {
            return (base, text);
        }
    }
    DEFAULT_JUMP_COLOR
}

fn jump_visible(term: &str, displayed: usize, total: usize, criteria: SortCriteria) -> bool {
    term.is_empty() && displayed == total && total > 0 && criteria == SortCriteria::Class
}

fn build_jump_buttons(class_names: &[String]) -> Vec<JumpButton> {
    class_names
        .iter()
        .map(|class_label| {
            let class_number = class_number_text(class_label.as_str());
            let (base_color, text_color) = jump_color(class_number.as_str());
            JumpButton {
                class_label: class_label.clone(),
                anchor: format!("class-start-{class_number}"),
                class_number,
                base_color: base_color.to_string(),
                text_color: text_color.to_string(),
            }
        })
        .collect()
}

fn render_view(state: &RosterState, view: &ViewState) -> serde_json::Value {
    let filtered = filter_profiles(&state.profiles, view.term.as_str());
    let sorted = sort_profiles(filtered, view.criteria, view.ascending);
    let cards = build_cards(sorted.as_slice(), view.criteria, view.term.as_str());
    let displayed = cards.len();
    let jump_on = jump_visible(view.term.as_str(), displayed, state.total, view.criteria);
    let buttons = if jump_on {
        build_jump_buttons(state.class_names.as_slice())
    } else {
        Vec::new()
    };
    json!({
        "cards": cards,
        "displayed": displayed,
        "total": state.total,
        "term": view.term,
        "criteria": view.criteria.as_str(),
        "ascending": view.ascending,
        "jump": { "visible": jump_on, "buttons": buttons },
    })
}

/* ============================================================
 * Roster state transitions
 * ============================================================ */

fn commit_roster(profiles: Vec<Profile>) -> Result<serde_json::Value, String> {
    let class_names = distinct_class_names(profiles.as_slice());
    let total = profiles.len();
    let mut state = lock_state(roster_state())?;
    *state = RosterState {
        profiles,
        class_names: class_names.clone(),
        total,
        loaded: true,
    };
    Ok(json!({ "ok": true, "total": total, "classNames": class_names }))
}

fn reset_roster_state() -> Result<(), String> {
    let mut state = lock_state(roster_state())?;
    *state = RosterState::default();
    Ok(())
}

fn commit_pending(pending: &mut PendingQuery) -> Option<String> {
    // Whitespace is trimmed only at commit time, never while buffering.
    pending.term.take().map(|raw| raw.trim().to_string())
}

/* ============================================================
 * Document store
 * ============================================================ */

fn roster_file_path(app: &AppHandle) -> Result<PathBuf, String> {
    let root = storage_root_dir(app)?;
    Ok(root.join(ROSTER_FILE))
}

fn read_roster_document(app: &AppHandle, password: &str) -> Result<RosterDocument, String> {
    let path = roster_file_path(app)?;
    if !path.exists() {
        return Ok(RosterDocument::Missing);
    }
    let raw = fs::read_to_string(path).map_err(|err| err.to_string())?;
    let envelope: CryptoEnvelope = match serde_json::from_str(raw.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(RosterDocument::Broken),
    };
    let decrypted = match decrypt_envelope(&envelope, password)? {
        Some(text) => text,
        None => return Ok(RosterDocument::Broken),
    };
    match serde_json::from_str::<serde_json::Value>(decrypted.as_str()) {
        Ok(value) if value.is_object() => Ok(RosterDocument::Found(value)),
        _ => Ok(RosterDocument::Broken),
    }
}

fn write_roster_document(
    app: &AppHandle,
    password: &str,
    document: &serde_json::Value,
) -> Result<(), String> {
    let plaintext = serde_json::to_string(document).map_err(|err| err.to_string())?;
    let envelope = encrypt_text(plaintext.as_str(), password)?;
    let content = serde_json::to_string(&envelope).map_err(|err| err.to_string())?;
    write_text_file(roster_file_path(app)?, content.as_str())
}

/// Accepts either an encrypted envelope produced by this app or a plaintext
/// roster document; anything else is rejected as `None`.
fn parse_import_document(raw: &str, password: &str) -> Result<Option<serde_json::Value>, String> {
    if let Ok(envelope) = serde_json::from_str::<CryptoEnvelope>(raw) {
        let Some(decrypted) = decrypt_envelope(&envelope, password)? else {
            return Ok(None);
        };
        return Ok(
            match serde_json::from_str::<serde_json::Value>(decrypted.as_str()) {
                Ok(value) if value.is_object() => Some(value),
                _ => None,
            },
        );
    }
    Ok(match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    })
}

/* ============================================================
 * Identity records
 * ============================================================ */

fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

fn auth_file_path(app: &AppHandle) -> Result<PathBuf, String> {
    let root = storage_root_dir(app)?;
    Ok(root.join(AUTH_FILE))
}

fn read_auth_record(app: &AppHandle) -> Result<Option<AuthRecord>, String> {
    let path = auth_file_path(app)?;
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|err| err.to_string())?;
    let mut record: AuthRecord = match serde_json::from_str(raw.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    if record.salt.is_empty() || record.hash.is_empty() {
        return Ok(None);
    }
    if record.iterations == 0 {
        record.iterations = DEFAULT_PBKDF2_ITERATIONS;
    }
    Ok(Some(record))
}

fn write_auth_record(app: &AppHandle, payload: &AuthRecord) -> Result<(), String> {
    let path = auth_file_path(app)?;
    let content = serde_json::to_string_pretty(payload).map_err(|err| err.to_string())?;
    write_text_file(path, content.as_str())
}

fn verify_password_record(record: &AuthRecord, password: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    let salt = match decode_b64(record.salt.as_str()) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let key = derive_key(password, salt.as_slice(), record.iterations.max(1));
    encode_b64(key.as_slice()) == record.hash
}

fn verify_auth_password(app: &AppHandle, password: &str) -> Result<bool, String> {
    let Some(record) = read_auth_record(app)? else {
        return Ok(false);
    };
    Ok(verify_password_record(&record, password))
}

/* ============================================================
 * Crypto envelope
 * ============================================================ */

fn encrypt_text_with_key(
    text: &str,
    salt: &[u8],
    key: &[u8; 32],
) -> Result<CryptoEnvelope, String> {
    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);
    let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|err| err.to_string())?;
    let nonce = Nonce::from_slice(&iv);
    let encrypted = cipher
        .encrypt(nonce, text.as_bytes())
        .map_err(|err| err.to_string())?;

    if encrypted.len() < 16 {
        return Err("Encryption output too short.".to_string());
    }
    let split_at = encrypted.len() - 16;
    let (data, tag) = encrypted.split_at(split_at);

    Ok(CryptoEnvelope {
        v: 1,
        salt: encode_b64(salt),
        iv: encode_b64(&iv),
        tag: encode_b64(tag),
        data: encode_b64(data),
    })
}

fn encrypt_text(text: &str, password: &str) -> Result<CryptoEnvelope, String> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(password, &salt, DEFAULT_PBKDF2_ITERATIONS);
    encrypt_text_with_key(text, &salt, &key)
}

fn decrypt_envelope_with_key(
    payload: &CryptoEnvelope,
    key: &[u8; 32],
) -> Result<Option<String>, String> {
    let iv = match decode_b64(payload.iv.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let tag = match decode_b64(payload.tag.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let data = match decode_b64(payload.data.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    if iv.len() != 12 || tag.is_empty() || data.is_empty() {
        return Ok(None);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_slice()).map_err(|err| err.to_string())?;
    let nonce = Nonce::from_slice(iv.as_slice());
    let mut combined = Vec::with_capacity(data.len() + tag.len());
    combined.extend_from_slice(data.as_slice());
    combined.extend_from_slice(tag.as_slice());

    let decrypted = match cipher.decrypt(nonce, combined.as_slice()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };

    match String::from_utf8(decrypted) {
        Ok(text) => Ok(Some(text)),
        Err(_) => Ok(None),
    }
}

fn decrypt_envelope(payload: &CryptoEnvelope, password: &str) -> Result<Option<String>, String> {
    let salt = match decode_b64(payload.salt.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let key = derive_key(password, salt.as_slice(), DEFAULT_PBKDF2_ITERATIONS);
    decrypt_envelope_with_key(payload, &key)
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

fn decode_b64(value: &str) -> Result<Vec<u8>, String> {
    B64.decode(value).map_err(|err| err.to_string())
}

fn encode_b64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/* ============================================================
 * Storage and CSV helpers
 * ============================================================ */

fn storage_root_dir(app: &AppHandle) -> Result<PathBuf, String> {
    static RESOLVED_ROOT: OnceLock<PathBuf> = OnceLock::new();
    if let Some(root) = RESOLVED_ROOT.get() {
        return Ok(root.clone());
    }

    let base = app.path().app_data_dir().map_err(|err| err.to_string())?;
    let root = base.join("Roster");
    fs::create_dir_all(root.as_path()).map_err(|err| err.to_string())?;
    let _ = RESOLVED_ROOT.set(root.clone());
    Ok(root)
}

fn write_text_file(path: PathBuf, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    fs::write(path, content).map_err(|err| err.to_string())?;
    Ok(())
}

fn sanitize_filename(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "roster-export.csv".to_string()
    } else {
        trimmed.to_string()
    }
}

fn sanitize_export_filename(value: &str) -> String {
    let safe = sanitize_filename(value.trim());
    if safe.to_lowercase().ends_with(".csv") {
        safe
    } else {
        format!("{safe}.csv")
    }
}

fn should_neutralize_csv(value: &str) -> bool {
    let trimmed = value.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('\'') {
        return false;
    }
    matches!(
        trimmed.chars().next(),
        Some('=') | Some('+') | Some('-') | Some('@')
    )
}

fn neutralize_csv_formula(value: &str) -> String {
    if should_neutralize_csv(value) {
        format!("'{value}")
    } else {
        value.to_string()
    }
}

fn csv_escape(value: &str) -> String {
    let safe = neutralize_csv_formula(value);
    if safe.contains(',') || safe.contains('"') || safe.contains('\n') || safe.contains('\r') {
        format!("\"{}\"", safe.replace('"', "\"\""))
    } else {
        safe
    }
}

fn cell_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Number(number)) => number.to_string(),
        Some(serde_json::Value::Bool(boolean)) => boolean.to_string(),
        _ => String::new(),
    }
}

fn rows_to_csv(columns: &[String], rows: &[serde_json::Value]) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !columns.is_empty() {
        lines.push(
            columns
                .iter()
                .map(|col| csv_escape(col.as_str()))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    for row in rows {
        let line = columns
            .iter()
            .map(|column| {
                let value = row.as_object().and_then(|obj| obj.get(column));
                csv_escape(cell_text(value).as_str())
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    lines.join("\n")
}

fn value_usize(value: Option<&serde_json::Value>) -> usize {
    value.and_then(|v| v.as_u64()).unwrap_or(0) as usize
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_clipboard_manager::init())
        .invoke_handler(tauri::generate_handler![
            app_version,
            platform_name,
            storage_info,
            open_storage_folder,
            clipboard_write,
            auth_read,
            auth_setup,
            auth_verify,
            auth_change,
            roster_load,
            roster_import,
            roster_query_buffer,
            roster_query_commit,
            roster_set_sort,
            roster_toggle_direction,
            roster_render,
            roster_export_csv,
            save_csv_file
        ])
        .run(tauri::generate_context!())
        .expect("failed to run Roster Viewer");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_document() -> serde_json::Value {
        json!({
            "students": [
                { "number": 3, "class": 1, "name": "Aoi", "kana": "あおい" },
                { "number": 1, "class": 1, "name": "Ren", "kana": "れん" },
            ]
        })
    }

    fn sample_profiles() -> Vec<Profile> {
        map_roster_document(&sample_document())
    }

    fn make_profile(number: i64, class: i64, name: &str, kana: &str) -> Profile {
        map_roster_record(&json!({
            "number": number,
            "class": class,
            "name": name,
            "kana": kana,
        }))
    }

    fn loaded_state(profiles: Vec<Profile>) -> RosterState {
        let class_names = distinct_class_names(profiles.as_slice());
        let total = profiles.len();
        RosterState {
            profiles,
            class_names,
            total,
            loaded: true,
        }
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("アオイ")]
    #[case("あ お\u{3000}い")]
    #[case("ABC def")]
    #[case("3組 12ばん")]
    fn normalize_is_idempotent(#[case] input: &str) {
        let once = normalize_text(input);
        assert_eq!(normalize_text(once.as_str()), once);
    }

    #[test]
    fn normalize_strips_whitespace_and_folds() {
        assert_eq!(normalize_text("あ お\u{3000}い"), "あおい");
        assert_eq!(normalize_text("アオイ"), "あおい");
        assert_eq!(normalize_text("ReN "), "ren");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn katakana_and_hiragana_share_a_key() {
        assert_eq!(normalize_text("レン"), normalize_text("れん"));
        assert_eq!(normalize_text("ヶ"), normalize_text("ゖ"));
    }

    #[test]
    fn filter_empty_term_is_identity() {
        let profiles = sample_profiles();
        let out = filter_profiles(profiles.as_slice(), "");
        assert_eq!(out.len(), profiles.len());
        assert_eq!(out[0].name, "Aoi");
        assert_eq!(out[1].name, "Ren");

        let blank = filter_profiles(profiles.as_slice(), " \u{3000} ");
        assert_eq!(blank.len(), profiles.len());
    }

    #[test]
    fn filter_matches_normalized_reading() {
        let profiles = sample_profiles();
        let out = filter_profiles(profiles.as_slice(), "あおい");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Aoi");

        // Katakana input reaches the hiragana reading through normalization.
        let folded = filter_profiles(profiles.as_slice(), "アオイ");
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].name, "Aoi");
    }

    #[test]
    fn filter_requires_every_token() {
        let profiles = sample_profiles();
        let out = filter_profiles(profiles.as_slice(), "1組 れん");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Ren");

        let none = filter_profiles(profiles.as_slice(), "1組 ゆず");
        assert!(none.is_empty());
    }

    #[test]
    fn filter_result_is_subset() {
        let profiles = sample_profiles();
        for term in ["", "1", "あ", "zzz"] {
            let out = filter_profiles(profiles.as_slice(), term);
            assert!(out.len() <= profiles.len());
            for kept in out {
                assert!(profiles.iter().any(|p| std::ptr::eq(p, kept)));
            }
        }
    }

    #[test]
    fn sort_is_a_permutation() {
        let profiles = sample_profiles();
        let refs: Vec<&Profile> = profiles.iter().collect();
        let sorted = sort_profiles(refs, SortCriteria::Reading, false);
        assert_eq!(sorted.len(), profiles.len());
    }

    #[test]
    fn class_order_sorts_by_number_within_class() {
        let profiles = sample_profiles();
        let sorted = sort_profiles(profiles.iter().collect(), SortCriteria::Class, true);
        assert_eq!(sorted[0].name, "Ren");
        assert_eq!(sorted[1].name, "Aoi");
    }

    #[test]
    fn class_order_breaks_id_ties_by_reading() {
        let a = make_profile(1, 2, "Aoi", "あおい");
        let b = make_profile(1, 2, "Ren", "れん");
        assert_eq!(
            compare_class_then_number_then_reading(&a, &b),
            Ordering::Less
        );
        assert_eq!(
            compare_class_then_number_then_reading(&b, &a),
            Ordering::Greater
        );
    }

    #[test]
    fn class_order_compares_class_before_number() {
        let first = make_profile(99, 1, "Aoi", "あおい");
        let second = make_profile(1, 2, "Ren", "れん");
        assert_eq!(
            compare_class_then_number_then_reading(&first, &second),
            Ordering::Less
        );
    }

    #[test]
    fn reading_order_breaks_ties_by_number() {
        let a = make_profile(5, 1, "A", "ゆい");
        let b = make_profile(2, 3, "B", "ゆい");
        assert_eq!(compare_reading_then_number(&b, &a), Ordering::Less);
    }

    #[test]
    fn descending_is_exact_reverse_of_ascending() {
        let profiles = vec![
            make_profile(3, 1, "Aoi", "あおい"),
            make_profile(1, 1, "Ren", "れん"),
            make_profile(7, 2, "Yui", "ゆい"),
        ];
        for criteria in [SortCriteria::Class, SortCriteria::Reading] {
            let asc = sort_profiles(profiles.iter().collect(), criteria, true);
            let desc = sort_profiles(profiles.iter().collect(), criteria, false);
            let mut reversed = asc.clone();
            reversed.reverse();
            let desc_names: Vec<&str> = desc.iter().map(|p| p.name.as_str()).collect();
            let reversed_names: Vec<&str> = reversed.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(desc_names, reversed_names);
        }
    }

    #[test]
    fn reading_comparison_is_numeric_aware() {
        assert_eq!(compare_readings("2ばん", "10ばん"), Ordering::Less);
        assert_eq!(compare_readings("10ばん", "2ばん"), Ordering::Greater);
        assert_eq!(compare_readings("02ばん", "2ばん"), Ordering::Equal);
        assert_eq!(compare_readings("アオイ", "あおい"), Ordering::Equal);
    }

    #[rstest]
    #[case("3組", 3)]
    #[case("12組", 12)]
    #[case("特別", 0)]
    #[case("", 0)]
    fn class_sort_key_parses_numeric_portion(#[case] label: &str, #[case] expected: i64) {
        assert_eq!(class_sort_key(label), expected);
    }

    #[test]
    fn mapping_defaults_tolerate_malformed_records() {
        let profile = map_roster_record(&json!({ "number": "junk" }));
        assert_eq!(profile.number, 0);
        assert_eq!(profile.class_label, "");
        assert_eq!(profile.name, "");
        assert_eq!(profile.reading, "");

        let absent = map_roster_record(&json!({}));
        assert_eq!(absent.number, 0);
        assert_eq!(absent.norm_number, "");
    }

    #[test]
    fn mapping_formats_numeric_class_and_keeps_strings() {
        let numeric = map_roster_record(&json!({ "class": 3 }));
        assert_eq!(numeric.class_label, "3組");

        let text = map_roster_record(&json!({ "class": "特別" }));
        assert_eq!(text.class_label, "特別");
    }

    #[test]
    fn mapping_prefers_kana_over_reading() {
        let kana = map_roster_record(&json!({ "kana": "あおい", "reading": "れん" }));
        assert_eq!(kana.reading, "あおい");

        let fallback = map_roster_record(&json!({ "kana": "", "reading": "れん" }));
        assert_eq!(fallback.reading, "れん");
    }

    #[test]
    fn mapping_accepts_numeric_strings_for_number() {
        let profile = map_roster_record(&json!({ "number": " 7 " }));
        assert_eq!(profile.number, 7);
        assert_eq!(profile.norm_number, "7");
    }

    #[test]
    fn roster_records_prefers_students_over_list() {
        let both = json!({
            "students": [ { "name": "A" } ],
            "list": [ { "name": "B" }, { "name": "C" } ],
        });
        assert_eq!(roster_records(&both).len(), 1);

        let list_only = json!({ "list": [ { "name": "B" } ] });
        assert_eq!(roster_records(&list_only).len(), 1);

        assert!(roster_records(&json!({})).is_empty());
    }

    #[test]
    fn cards_zero_pad_numbers_to_three_digits() {
        let profiles = vec![make_profile(7, 1, "Aoi", "あおい")];
        let refs: Vec<&Profile> = profiles.iter().collect();
        let cards = build_cards(refs.as_slice(), SortCriteria::Class, "");
        assert_eq!(cards[0].number_label, "007");
        assert_eq!(cards[0].class_number, "1");
    }

    #[test]
    fn cards_anchor_first_of_each_class_only() {
        let profiles = vec![
            make_profile(1, 1, "A", "あ"),
            make_profile(2, 1, "B", "い"),
            make_profile(1, 2, "C", "う"),
        ];
        let refs: Vec<&Profile> = profiles.iter().collect();
        let cards = build_cards(refs.as_slice(), SortCriteria::Class, "");
        assert_eq!(cards[0].jump_anchor.as_deref(), Some("class-start-1"));
        assert_eq!(cards[1].jump_anchor, None);
        assert_eq!(cards[2].jump_anchor.as_deref(), Some("class-start-2"));
    }

    #[test]
    fn cards_skip_anchors_outside_full_class_view() {
        let profiles = vec![make_profile(1, 1, "A", "あ")];
        let refs: Vec<&Profile> = profiles.iter().collect();

        let searched = build_cards(refs.as_slice(), SortCriteria::Class, "あ");
        assert_eq!(searched[0].jump_anchor, None);

        let by_reading = build_cards(refs.as_slice(), SortCriteria::Reading, "");
        assert_eq!(by_reading[0].jump_anchor, None);
    }

    #[rstest]
    #[case("", 2, 2, SortCriteria::Class, true)]
    #[case("あ", 1, 2, SortCriteria::Class, false)]
    #[case("", 2, 2, SortCriteria::Reading, false)]
    #[case("", 1, 2, SortCriteria::Class, false)]
    #[case("", 0, 0, SortCriteria::Class, false)]
    fn jump_visibility_truth_table(
        #[case] term: &str,
        #[case] displayed: usize,
        #[case] total: usize,
        #[case] criteria: SortCriteria,
        #[case] expected: bool,
    ) {
        assert_eq!(jump_visible(term, displayed, total, criteria), expected);
    }

    #[test]
    fn jump_colors_fall_back_to_neutral() {
        assert_eq!(jump_color("3"), ("#e53935", "#ffffff"));
        assert_eq!(jump_color("9"), DEFAULT_JUMP_COLOR);
        assert_eq!(jump_color(""), DEFAULT_JUMP_COLOR);
    }

    #[test]
    fn jump_buttons_follow_numeric_class_order() {
        let profiles = vec![
            make_profile(1, 10, "A", "あ"),
            make_profile(2, 2, "B", "い"),
            make_profile(3, 1, "C", "う"),
        ];
        let names = distinct_class_names(profiles.as_slice());
        assert_eq!(names, vec!["1組", "2組", "10組"]);

        let buttons = build_jump_buttons(names.as_slice());
        assert_eq!(buttons[0].anchor, "class-start-1");
        assert_eq!(buttons[2].class_number, "10");
        assert_eq!(buttons[2].base_color, DEFAULT_JUMP_COLOR.0);
    }

    #[test]
    fn render_view_reports_counts_and_jump_state() {
        let state = loaded_state(sample_profiles());
        let view = ViewState::default();
        let out = render_view(&state, &view);
        assert_eq!(out["displayed"], 2);
        assert_eq!(out["total"], 2);
        assert_eq!(out["jump"]["visible"], true);
        assert_eq!(out["cards"][0]["name"], "Ren");
        assert_eq!(out["cards"][1]["name"], "Aoi");
    }

    #[test]
    fn render_view_hides_jump_while_searching() {
        let state = loaded_state(sample_profiles());
        let view = ViewState {
            term: "あおい".to_string(),
            ..ViewState::default()
        };
        let out = render_view(&state, &view);
        assert_eq!(out["displayed"], 1);
        assert_eq!(out["jump"]["visible"], false);
        assert!(out["jump"]["buttons"]
            .as_array()
            .is_some_and(|b| b.is_empty()));
    }

    #[test]
    fn empty_document_renders_empty_but_functional_state() {
        let profiles = map_roster_document(&json!({}));
        assert!(profiles.is_empty());

        let state = loaded_state(profiles);
        let out = render_view(&state, &ViewState::default());
        assert_eq!(out["total"], 0);
        assert_eq!(out["displayed"], 0);
        assert_eq!(out["jump"]["visible"], false);
    }

    #[test]
    fn pending_query_keeps_only_the_latest_term() {
        let mut pending = PendingQuery::default();
        pending.term = Some("first".to_string());
        pending.term = Some("  second  ".to_string());
        assert_eq!(commit_pending(&mut pending).as_deref(), Some("second"));
        assert_eq!(commit_pending(&mut pending), None);
    }

    #[test]
    fn pending_query_trims_only_at_commit() {
        let mut pending = PendingQuery::default();
        pending.term = Some("  あおい ".to_string());
        assert_eq!(pending.term.as_deref(), Some("  あおい "));
        assert_eq!(commit_pending(&mut pending).as_deref(), Some("あおい"));
    }

    #[test]
    fn envelope_round_trips_under_one_passphrase() {
        let document = sample_document().to_string();
        let envelope = encrypt_text(document.as_str(), "correct horse").expect("encrypt");
        let decrypted = decrypt_envelope(&envelope, "correct horse").expect("decrypt");
        assert_eq!(decrypted.as_deref(), Some(document.as_str()));
    }

    #[test]
    fn envelope_rejects_wrong_passphrase() {
        let envelope = encrypt_text("{}", "right").expect("encrypt");
        let decrypted = decrypt_envelope(&envelope, "wrong").expect("decrypt");
        assert_eq!(decrypted, None);
    }

    #[test]
    fn auth_record_accepts_and_rejects_passphrases() {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let iterations = 1_000;
        let key = derive_key("open sesame", &salt, iterations);
        let record = AuthRecord {
            salt: encode_b64(&salt),
            hash: encode_b64(key.as_slice()),
            iterations,
        };
        assert!(verify_password_record(&record, "open sesame"));
        assert!(!verify_password_record(&record, "open says me"));
        assert!(!verify_password_record(&record, ""));
    }

    #[test]
    fn import_accepts_plain_and_encrypted_documents() {
        let plain = sample_document().to_string();
        let parsed = parse_import_document(plain.as_str(), "pw").expect("parse");
        assert!(parsed.is_some());

        let envelope = encrypt_text(plain.as_str(), "pw").expect("encrypt");
        let raw = serde_json::to_string(&envelope).expect("serialize");
        let parsed = parse_import_document(raw.as_str(), "pw").expect("parse");
        assert!(parsed.is_some());

        let wrong = parse_import_document(raw.as_str(), "other").expect("parse");
        assert!(wrong.is_none());

        let garbage = parse_import_document("not json", "pw").expect("parse");
        assert!(garbage.is_none());
    }

    #[test]
    fn csv_neutralizes_formula_leaders() {
        assert_eq!(neutralize_csv_formula("=SUM(A1)"), "'=SUM(A1)");
        assert_eq!(neutralize_csv_formula("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn rows_to_csv_emits_header_and_rows() {
        let columns: Vec<String> = EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows = vec![json!({
            "number": "003",
            "class": "1組",
            "name": "Aoi",
            "reading": "あおい",
        })];
        let csv = rows_to_csv(columns.as_slice(), rows.as_slice());
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("number,class,name,reading"));
        assert_eq!(lines.next(), Some("003,1組,Aoi,あおい"));
    }

    #[test]
    fn sanitize_export_filename_appends_extension() {
        assert_eq!(sanitize_export_filename("roster view"), "roster_view.csv");
        assert_eq!(sanitize_export_filename("out.CSV"), "out.CSV");
        assert_eq!(sanitize_export_filename(""), "roster-export.csv");
    }
}
