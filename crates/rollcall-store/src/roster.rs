//! Employee roster. Employees are deactivated, never deleted, so historical
//! attendance keeps pointing at a known name.

use crate::{SqliteLedger, StoreError};
use rollcall_core::types::{identity_key, Employee, NewEmployee};
use rollcall_core::AttendanceError;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};

const EMPLOYEE_COLUMNS: &str = "id, name, employee_id, department, position, is_active, created_at";

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get(0)?,
        name: row.get(1)?,
        employee_code: row.get(2)?,
        department: row.get(3)?,
        position: row.get(4)?,
        active: row.get::<_, Option<bool>>(5)?.unwrap_or(true),
        created_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

impl SqliteLedger {
    /// Register a new active employee.
    pub fn add_employee(&self, new: &NewEmployee) -> Result<Employee, AttendanceError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(AttendanceError::InvalidInput("employee name cannot be empty".into()));
        }

        let result = self.conn.execute(
            "INSERT INTO employees (name, name_key, employee_id, department, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                identity_key(name),
                non_empty(&new.employee_code),
                non_empty(&new.department),
                non_empty(&new.position)
            ],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(AttendanceError::DuplicateEmployee(name.to_string()));
            }
            Err(e) => return Err(StoreError::from(e).into()),
        }

        let id = self.conn.last_insert_rowid();
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?1");
        let employee = self
            .conn
            .query_row(&sql, params![id], employee_from_row)
            .map_err(StoreError::from)?;
        tracing::info!(name, id, "employee registered");
        Ok(employee)
    }

    /// Employees ordered by name; inactive ones only when asked.
    pub fn list_employees(&self, include_inactive: bool) -> Result<Vec<Employee>, AttendanceError> {
        let filter = if include_inactive { "" } else { " WHERE is_active = 1" };
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees{filter} ORDER BY name_key");
        let mut stmt = self.conn.prepare(&sql).map_err(StoreError::from)?;
        let rows = stmt.query_map([], employee_from_row).map_err(StoreError::from)?;
        Ok(rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)?)
    }

    pub fn find_employee(&self, name: &str) -> Result<Option<Employee>, AttendanceError> {
        let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE name_key = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![identity_key(name)], employee_from_row)
            .optional()
            .map_err(StoreError::from)?)
    }

    /// Mark an active employee inactive. They stop counting toward the
    /// attendance rate denominator.
    pub fn deactivate_employee(&self, name: &str) -> Result<(), AttendanceError> {
        let changed = self
            .conn
            .execute(
                "UPDATE employees SET is_active = 0 WHERE name_key = ?1 AND is_active = 1",
                params![identity_key(name)],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(AttendanceError::UnknownEmployee(name.trim().to_string()));
        }
        tracing::info!(name = name.trim(), "employee deactivated");
        Ok(())
    }
}
