use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::stats::{PartScores, ScoreRecord, SectionScores, SubjectScores};
use crate::testconfig::TestType;

pub const DB_FILE_NAME: &str = "seiseki.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            student_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            password TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            name TEXT,
            test_name TEXT NOT NULL,
            test_date TEXT NOT NULL,
            test_type TEXT NOT NULL DEFAULT '100q',
            section_kanri REAL,
            section_kaibou REAL,
            section_gakkou REAL,
            section_rikou REAL,
            section_yushou REAL,
            section_shikan REAL,
            section_kyousei REAL,
            section_shouni REAL,
            part_a REAL,
            part_b REAL,
            part_c REAL,
            part_d REAL,
            total_score REAL NOT NULL,
            max_score REAL,
            created_at TEXT,
            UNIQUE(student_id, test_name, test_date),
            FOREIGN KEY(student_id) REFERENCES students(student_id)
        )",
        [],
    )?;

    // Workspaces created before test types existed carry score rows
    // without the column. Add it and backfill to the 100-question
    // variant those rows were graded under.
    ensure_scores_test_type(&conn)?;
    ensure_scores_part_columns(&conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_cohort ON test_scores(test_name, test_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON test_scores(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_scores_test_type(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "test_scores", "test_type")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE test_scores ADD COLUMN test_type TEXT NOT NULL DEFAULT '100q'",
        [],
    )?;
    Ok(())
}

fn ensure_scores_part_columns(conn: &Connection) -> anyhow::Result<()> {
    for col in ["part_a", "part_b", "part_c", "part_d"] {
        if !table_has_column(conn, "test_scores", col)? {
            conn.execute(
                &format!("ALTER TABLE test_scores ADD COLUMN {} REAL", col),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Row-load failures that need distinct IPC error codes.
#[derive(Debug)]
pub enum LoadError {
    Db(rusqlite::Error),
    /// A stored `test_type` with no configuration. Never defaulted;
    /// defaulting would silently apply the wrong passing threshold.
    UnknownTestType { test_type: String },
}

impl From<rusqlite::Error> for LoadError {
    fn from(e: rusqlite::Error) -> Self {
        LoadError::Db(e)
    }
}

const SCORE_COLUMNS: &str = "id, student_id, name, test_name, test_date, test_type,
    section_kanri, section_kaibou, section_gakkou, section_rikou,
    section_yushou, section_shikan, section_kyousei, section_shouni,
    part_a, part_b, part_c, part_d,
    total_score, created_at";

fn opt_num(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(0.0))
}

fn map_score_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ScoreRecord, String>> {
    let test_type_raw: String = row.get(5)?;
    let Some(test_type) = TestType::parse(&test_type_raw) else {
        return Ok(Err(test_type_raw));
    };

    let sections = match test_type {
        TestType::Legacy400 => SectionScores::Parts(PartScores {
            a: opt_num(row, 14)?,
            b: opt_num(row, 15)?,
            c: opt_num(row, 16)?,
            d: opt_num(row, 17)?,
        }),
        TestType::Q100 | TestType::Q80 => SectionScores::Subjects(SubjectScores {
            kanri: opt_num(row, 6)?,
            kaibou: opt_num(row, 7)?,
            gakkou: opt_num(row, 8)?,
            rikou: opt_num(row, 9)?,
            yushou: opt_num(row, 10)?,
            shikan: opt_num(row, 11)?,
            kyousei: opt_num(row, 12)?,
            shouni: opt_num(row, 13)?,
        }),
    };

    Ok(Ok(ScoreRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        test_name: row.get(3)?,
        test_date: row.get(4)?,
        test_type,
        sections,
        stored_total: opt_num(row, 18)?,
        created_at: row.get(19)?,
    }))
}

fn collect_records(
    rows: Vec<Result<ScoreRecord, String>>,
) -> Result<Vec<ScoreRecord>, LoadError> {
    rows.into_iter()
        .map(|r| r.map_err(|test_type| LoadError::UnknownTestType { test_type }))
        .collect()
}

/// All records of one test administration, the unit over which
/// averages and ranks are computed.
pub fn load_cohort(
    conn: &Connection,
    test_name: &str,
    test_date: &str,
) -> Result<Vec<ScoreRecord>, LoadError> {
    let sql = format!(
        "SELECT {} FROM test_scores WHERE test_name = ? AND test_date = ?",
        SCORE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((test_name, test_date), map_score_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect_records(rows)
}

/// One student's records, newest test first.
pub fn load_student_scores(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<ScoreRecord>, LoadError> {
    let sql = format!(
        "SELECT {} FROM test_scores WHERE student_id = ? ORDER BY test_date DESC, test_name",
        SCORE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], map_score_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect_records(rows)
}

/// Every record in the workspace; feeds the overall rankings.
pub fn load_all_scores(conn: &Connection) -> Result<Vec<ScoreRecord>, LoadError> {
    let sql = format!("SELECT {} FROM test_scores", SCORE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_score_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect_records(rows)
}

pub fn score_exists(
    conn: &Connection,
    student_id: &str,
    test_name: &str,
    test_date: &str,
) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM test_scores WHERE student_id = ? AND test_name = ? AND test_date = ?",
            (student_id, test_name, test_date),
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn student_exists(conn: &Connection, student_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub struct NewScore<'a> {
    pub id: &'a str,
    pub student_id: &'a str,
    pub name: &'a str,
    pub test_name: &'a str,
    pub test_date: &'a str,
    pub test_type: TestType,
    pub sections: &'a SectionScores,
    pub total_score: f64,
    pub max_score: Option<f64>,
    pub created_at: &'a str,
}

pub fn insert_score(conn: &Connection, score: &NewScore<'_>) -> rusqlite::Result<()> {
    let (subjects, parts) = match score.sections {
        SectionScores::Subjects(s) => (Some(s), None),
        SectionScores::Parts(p) => (None, Some(p)),
    };
    conn.execute(
        "INSERT INTO test_scores(
            id, student_id, name, test_name, test_date, test_type,
            section_kanri, section_kaibou, section_gakkou, section_rikou,
            section_yushou, section_shikan, section_kyousei, section_shouni,
            part_a, part_b, part_c, part_d,
            total_score, max_score, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            score.id,
            score.student_id,
            score.name,
            score.test_name,
            score.test_date,
            score.test_type.as_str(),
            subjects.map(|s| s.kanri),
            subjects.map(|s| s.kaibou),
            subjects.map(|s| s.gakkou),
            subjects.map(|s| s.rikou),
            subjects.map(|s| s.yushou),
            subjects.map(|s| s.shikan),
            subjects.map(|s| s.kyousei),
            subjects.map(|s| s.shouni),
            parts.map(|p| p.a),
            parts.map(|p| p.b),
            parts.map(|p| p.c),
            parts.map(|p| p.d),
            score.total_score,
            score.max_score,
            score.created_at,
        ],
    )?;
    Ok(())
}

/// Distinct test administrations with record counts, newest first.
/// `mixed_test_types` surfaces cohorts that violate the
/// one-type-per-administration invariant.
pub struct TestSummaryRow {
    pub test_name: String,
    pub test_date: String,
    pub test_type: String,
    pub record_count: i64,
    pub mixed_test_types: bool,
}

pub fn list_tests(conn: &Connection) -> rusqlite::Result<Vec<TestSummaryRow>> {
    let mut stmt = conn.prepare(
        "SELECT test_name, test_date, MIN(test_type), COUNT(*), COUNT(DISTINCT test_type)
         FROM test_scores
         GROUP BY test_name, test_date
         ORDER BY test_date DESC, test_name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(TestSummaryRow {
                test_name: r.get(0)?,
                test_date: r.get(1)?,
                test_type: r.get(2)?,
                record_count: r.get(3)?,
                mixed_test_types: r.get::<_, i64>(4)? > 1,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_cohort(
    conn: &Connection,
    test_name: &str,
    test_date: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM test_scores WHERE test_name = ? AND test_date = ?",
        (test_name, test_date),
    )
}
