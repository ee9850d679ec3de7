use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::config::RecordingPolicy;
use crate::model::{BlockId, InstructionId, Trace};
use crate::process::shell_join;
use crate::sink::format::{hex_addr, hex_bytes, mem_columns};
use crate::sink::{SinkError, SinkRequirements, SinkResult, TraceSink};

/// Rows inserted per transaction.
pub const BATCH_ROWS: usize = 10_000;

/// Thread id of the single synthetic thread.
const THREAD_ID: i64 = 0;

/// Schema shared with external trace viewers.
const SCHEMA: &str = r#"
CREATE TABLE info (key TEXT PRIMARY KEY, value TEXT);
CREATE TABLE lib (name TEXT, base TEXT, end TEXT);
CREATE TABLE thread (thread_id INTEGER, start_bbl_id INTEGER, exit_bbl_id INTEGER);
CREATE TABLE bbl (addr TEXT, addr_end TEXT, size INTEGER, thread_id INTEGER);
CREATE TABLE ins (bbl_id INTEGER, ip TEXT, dis TEXT, op TEXT);
CREATE TABLE mem (ins_id INTEGER, ip TEXT, type TEXT, addr TEXT, addr_end TEXT, size INTEGER, data TEXT, value TEXT);
"#;

/// Relational sink writing a fresh SQLite store.
///
/// The store is built in a temporary file next to the target and renamed over
/// it once complete, so an existing file at the target path is replaced and a
/// failed write never leaves a partial store behind.
#[derive(Debug)]
pub struct SqliteSink {
    path: PathBuf,
    finalized: bool,
}

impl SqliteSink {
    /// Create a sink writing to `path`.
    ///
    /// Rejects policies that would leave `ins` rows without blocks or `mem`
    /// rows without instructions.
    pub fn create(path: impl Into<PathBuf>, policy: &RecordingPolicy) -> SinkResult<Self> {
        if policy.suppress_instructions {
            return Err(SinkError::IncompatiblePolicy {
                sink: "sqlite",
                reason: "memory accesses need instruction rows; suppress_instructions must be false",
            });
        }
        if !policy.record_blocks {
            return Err(SinkError::IncompatiblePolicy {
                sink: "sqlite",
                reason: "instruction rows need block rows; record_blocks must be true",
            });
        }
        Ok(Self { path: path.into(), finalized: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_store(&self, trace: &Trace) -> SinkResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".trace-")
            .suffix(".sqlite.partial")
            .tempfile_in(&dir)
            .map_err(|err| SinkError::io(&dir, err))?;

        {
            let mut conn = Connection::open(staging.path())?;
            conn.pragma_update(None, "synchronous", "OFF")?;
            conn.execute_batch(SCHEMA)?;
            write_info(&mut conn, trace)?;
            write_lib(&mut conn, trace)?;
            write_thread(&mut conn, trace)?;
            write_bbl(&mut conn, trace)?;
            write_ins(&mut conn, trace)?;
            write_mem(&mut conn, trace)?;
            conn.close().map_err(|(_, err)| err)?;
        }

        staging.persist(&self.path).map_err(|err| SinkError::io(&self.path, err.error))?;
        Ok(())
    }
}

impl TraceSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn requirements(&self) -> SinkRequirements {
        SinkRequirements { retain_records: true, strict_correlation: true }
    }

    fn begin(&mut self, _trace: &Trace) -> SinkResult<()> {
        Ok(())
    }

    fn finalize(&mut self, trace: &Trace) -> SinkResult<()> {
        if self.finalized {
            return Err(SinkError::AlreadyFinalized { sink: "sqlite" });
        }
        self.finalized = true;

        verify_correlation(trace)?;
        self.write_store(trace)?;
        tracing::info!(path = %self.path.display(), summary = %trace.summary(), "wrote trace store");
        Ok(())
    }
}

/// Check that every access points at an instruction with the same address.
pub fn verify_correlation(trace: &Trace) -> SinkResult<()> {
    for (index, access) in trace.accesses.iter().enumerate() {
        let parent = access.instruction.and_then(|id| trace.instruction(id));
        match parent {
            Some(ins) if ins.address == access.instruction_address => {}
            Some(ins) => {
                return Err(SinkError::Correlation {
                    index,
                    instruction_address: access.instruction_address,
                    parent: format!("instruction {} at {:#x}", ins.id.0, ins.address),
                })
            }
            None => {
                return Err(SinkError::Correlation {
                    index,
                    instruction_address: access.instruction_address,
                    parent: "no recorded instruction".to_string(),
                })
            }
        }
    }
    Ok(())
}

/// Insert `rows` in transactions of [`BATCH_ROWS`] using one prepared statement.
fn insert_batched<T>(
    conn: &mut Connection,
    sql: &str,
    rows: &[T],
    mut insert: impl FnMut(&mut rusqlite::Statement<'_>, &T) -> rusqlite::Result<()>,
) -> SinkResult<()> {
    for chunk in rows.chunks(BATCH_ROWS) {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for row in chunk {
                insert(&mut *stmt, row)?;
            }
        }
        tx.commit()?;
    }
    Ok(())
}

fn write_info(conn: &mut Connection, trace: &Trace) -> SinkResult<()> {
    let process = &trace.process;
    let infos = [
        ("TRACERGRIND_VERSION", process.tracer_version.clone()),
        ("ARCH", process.arch.clone()),
        ("PROGRAM", process.program.clone()),
        ("ARGS", shell_join(&process.args)),
    ];
    insert_batched(conn, "INSERT INTO info (key, value) VALUES (?1, ?2);", &infos, |stmt, row| {
        stmt.execute(params![row.0, row.1])?;
        Ok(())
    })
}

fn write_lib(conn: &mut Connection, trace: &Trace) -> SinkResult<()> {
    insert_batched(
        conn,
        "INSERT INTO lib (name, base, end) VALUES (?1, ?2, ?3);",
        &trace.regions,
        |stmt, region| {
            stmt.execute(params![region.name, hex_addr(region.start), hex_addr(region.end)])?;
            Ok(())
        },
    )
}

fn write_thread(conn: &mut Connection, trace: &Trace) -> SinkResult<()> {
    conn.execute(
        "INSERT INTO thread (thread_id, start_bbl_id, exit_bbl_id) VALUES (?1, ?2, ?3);",
        params![THREAD_ID, 0_i64, BlockId::column(trace.last_block_id())],
    )?;
    Ok(())
}

fn write_bbl(conn: &mut Connection, trace: &Trace) -> SinkResult<()> {
    insert_batched(
        conn,
        "INSERT INTO bbl (addr, addr_end, size, thread_id) VALUES (?1, ?2, ?3, ?4);",
        &trace.blocks,
        |stmt, block| {
            stmt.execute(params![
                hex_addr(block.start),
                hex_addr(block.last_addr()),
                block.size as i64,
                THREAD_ID
            ])?;
            Ok(())
        },
    )
}

fn write_ins(conn: &mut Connection, trace: &Trace) -> SinkResult<()> {
    insert_batched(
        conn,
        "INSERT INTO ins (bbl_id, ip, dis, op) VALUES (?1, ?2, ?3, ?4);",
        &trace.instructions,
        |stmt, ins| {
            stmt.execute(params![
                BlockId::column(ins.block),
                hex_addr(ins.address),
                ins.disassembly,
                hex_bytes(&ins.bytes)
            ])?;
            Ok(())
        },
    )
}

fn write_mem(conn: &mut Connection, trace: &Trace) -> SinkResult<()> {
    insert_batched(
        conn,
        "INSERT INTO mem (ins_id, ip, type, addr, addr_end, size, data, value) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        &trace.accesses,
        |stmt, access| {
            let (data, value) = mem_columns(access);
            stmt.execute(params![
                InstructionId::column(access.instruction),
                hex_addr(access.instruction_address),
                access.direction.code(),
                hex_addr(access.address),
                hex_addr(access.last_addr()),
                access.size as i64,
                data,
                value
            ])?;
            Ok(())
        },
    )
}
