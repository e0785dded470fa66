use crate::{backend, SqliteStore};
use chrono::Utc;
use rollcall_core::{EnrolledPerson, PersonId, ReferenceImages, RosterProvider, StoreError};
use rusqlite::{params, Row};
use std::path::PathBuf;

/// A person to add to the roster.
#[derive(Debug, Clone)]
pub struct NewPerson {
    pub name: String,
    pub roll_no: String,
    pub class_label: String,
    /// Folder holding the person's reference photos.
    pub images_dir: Option<PathBuf>,
}

/// Fields to change on an enrolled person; `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub roll_no: Option<String>,
    pub class_label: Option<String>,
    pub images_dir: Option<PathBuf>,
}

impl PersonUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.roll_no.is_none()
            && self.class_label.is_none()
            && self.images_dir.is_none()
    }
}

const PERSON_COLUMNS: &str = "id, name, roll_no, class_label, images_path";

fn row_to_person(row: &Row) -> rusqlite::Result<EnrolledPerson> {
    let images_path: Option<String> = row.get("images_path")?;
    Ok(EnrolledPerson {
        id: row.get("id")?,
        name: row.get("name")?,
        roll_no: row.get("roll_no")?,
        class_label: row.get("class_label")?,
        images: images_path
            .map(|p| ReferenceImages::Directory(PathBuf::from(p)))
            .unwrap_or_default(),
    })
}

impl SqliteStore {
    pub fn add_person(&self, person: &NewPerson) -> Result<PersonId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO people (name, roll_no, class_label, images_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    person.name,
                    person.roll_no,
                    person.class_label,
                    person.images_dir.as_ref().map(|p| p.to_string_lossy().into_owned()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(backend)?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(person = id, roll_no = %person.roll_no, class = %person.class_label, "person enrolled");
        Ok(id)
    }

    /// Everyone, or only one class, ordered by id.
    pub fn list_people(&self, class_label: Option<&str>) -> Result<Vec<EnrolledPerson>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PERSON_COLUMNS} FROM people
                 WHERE (?1 IS NULL OR class_label = ?1)
                 ORDER BY id"
            ))
            .map_err(backend)?;
        let people = stmt
            .query_map(params![class_label], row_to_person)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(people)
    }

    /// Change a person in place, keeping their attendance history. Returns
    /// false if the id is unknown; a roll number already in use is an error.
    pub fn update_person(&self, id: PersonId, update: &PersonUpdate) -> Result<bool, StoreError> {
        let updated = self
            .conn
            .execute(
                "UPDATE people SET
                     name = COALESCE(?2, name),
                     roll_no = COALESCE(?3, roll_no),
                     class_label = COALESCE(?4, class_label),
                     images_path = COALESCE(?5, images_path)
                 WHERE id = ?1",
                params![
                    id,
                    update.name,
                    update.roll_no,
                    update.class_label,
                    update.images_dir.as_ref().map(|p| p.to_string_lossy().into_owned()),
                ],
            )
            .map_err(backend)?;
        if updated > 0 {
            tracing::info!(person = id, "person updated");
        }
        Ok(updated > 0)
    }

    /// Remove a person and their attendance records. Returns false if unknown.
    pub fn remove_person(&self, id: PersonId) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM people WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(removed > 0)
    }
}

impl RosterProvider for SqliteStore {
    fn people_in_class(&self, class_label: &str) -> Result<Vec<EnrolledPerson>, StoreError> {
        self.list_people(Some(class_label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_person(name: &str, roll: &str, class: &str) -> NewPerson {
        NewPerson {
            name: name.into(),
            roll_no: roll.into(),
            class_label: class.into(),
            images_dir: None,
        }
    }

    #[test]
    fn test_people_filtered_by_class() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_person(&new_person("Alice", "R1", "CS101")).unwrap();
        store.add_person(&new_person("Bob", "R2", "CS101")).unwrap();
        store.add_person(&new_person("Eve", "R3", "EE200")).unwrap();

        let cs = store.people_in_class("CS101").unwrap();
        assert_eq!(cs.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["Alice", "Bob"]);
        assert_eq!(store.list_people(None).unwrap().len(), 3);
        assert!(store.people_in_class("MA300").unwrap().is_empty());
    }

    #[test]
    fn test_images_dir_round_trips_as_directory() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut p = new_person("Alice", "R1", "CS101");
        p.images_dir = Some(PathBuf::from("/srv/faces/1"));
        store.add_person(&p).unwrap();
        store.add_person(&new_person("Bob", "R2", "CS101")).unwrap();

        let people = store.list_people(None).unwrap();
        assert!(matches!(&people[0].images, ReferenceImages::Directory(d) if d == &PathBuf::from("/srv/faces/1")));
        assert!(matches!(people[1].images, ReferenceImages::None));
    }

    #[test]
    fn test_duplicate_roll_no_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_person(&new_person("Alice", "R1", "CS101")).unwrap();
        assert!(matches!(
            store.add_person(&new_person("Alicia", "R1", "CS101")),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn test_remove_person() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.add_person(&new_person("Alice", "R1", "CS101")).unwrap();
        assert!(store.remove_person(id).unwrap());
        assert!(!store.remove_person(id).unwrap());
        assert!(store.list_people(None).unwrap().is_empty());
    }

    #[test]
    fn test_update_person_moves_class_and_keeps_unset_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.add_person(&new_person("Alice", "R1", "CS101")).unwrap();

        let update = PersonUpdate {
            class_label: Some("CS201".into()),
            images_dir: Some(PathBuf::from("/srv/faces/alice")),
            ..PersonUpdate::default()
        };
        assert!(store.update_person(id, &update).unwrap());

        assert!(store.people_in_class("CS101").unwrap().is_empty());
        let moved = store.people_in_class("CS201").unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].name, "Alice");
        assert_eq!(moved[0].roll_no, "R1");
        assert!(matches!(&moved[0].images, ReferenceImages::Directory(d) if d == &PathBuf::from("/srv/faces/alice")));
    }

    #[test]
    fn test_update_person_unknown_id_and_roll_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_person(&new_person("Alice", "R1", "CS101")).unwrap();
        let bob = store.add_person(&new_person("Bob", "R2", "CS101")).unwrap();

        let rename = PersonUpdate {
            name: Some("Robert".into()),
            ..PersonUpdate::default()
        };
        assert!(!store.update_person(999, &rename).unwrap());

        let steal_roll = PersonUpdate {
            roll_no: Some("R1".into()),
            ..PersonUpdate::default()
        };
        assert!(matches!(store.update_person(bob, &steal_roll), Err(StoreError::Backend(_))));
        let people = store.list_people(None).unwrap();
        assert_eq!(people[1].roll_no, "R2");
    }
}
