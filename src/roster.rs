use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::limits::MAX_ROSTER_SIZE;
use crate::model::{Doctor, DoctorType};

/// Read-only doctor reference data, loaded once at startup.
#[derive(Debug, Clone)]
pub struct DoctorRoster {
    doctors: Vec<Doctor>,
    index: HashMap<String, usize>,
}

impl Default for DoctorRoster {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DoctorRoster {
    pub fn new(doctors: Vec<Doctor>) -> io::Result<Self> {
        if doctors.len() > MAX_ROSTER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "roster too large"));
        }
        let mut index = HashMap::with_capacity(doctors.len());
        for (pos, doctor) in doctors.iter().enumerate() {
            if doctor.id.trim().is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("doctor at position {pos} has an empty id"),
                ));
            }
            if index.insert(doctor.id.clone(), pos).is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("duplicate doctor id: {}", doctor.id),
                ));
            }
        }
        Ok(Self { doctors, index })
    }

    /// The clinic's standing roster.
    pub fn builtin() -> Self {
        let entries = [
            ("dr-green", "John Green", DoctorType::Cardiologist),
            ("dr-cameron", "Leila Cameron", DoctorType::FamilyMedicine),
            ("dr-livingston", "David Livingston", DoctorType::InternalMedicine),
            ("dr-peter", "Evan Peter", DoctorType::Cardiologist),
            ("dr-powell", "Jane Powell", DoctorType::FamilyMedicine),
            ("dr-ramirez", "Alex Ramirez", DoctorType::InternalMedicine),
            ("dr-lee", "Jasmine Lee", DoctorType::Cardiologist),
            ("dr-cruz", "Alyana Cruz", DoctorType::FamilyMedicine),
            ("dr-sharma", "Hardik Sharma", DoctorType::InternalMedicine),
        ];
        let doctors: Vec<Doctor> = entries
            .into_iter()
            .map(|(id, name, doctor_type)| Doctor {
                id: id.to_string(),
                name: name.to_string(),
                doctor_type,
            })
            .collect();
        let index = doctors
            .iter()
            .enumerate()
            .map(|(pos, d)| (d.id.clone(), pos))
            .collect();
        Self { doctors, index }
    }

    /// Load a roster from a JSON array of `{ "id", "name", "type" }` objects.
    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> io::Result<Self> {
        let doctors: Vec<Doctor> = serde_json::from_str(raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Self::new(doctors)
    }

    pub fn get(&self, doctor_id: &str) -> Option<&Doctor> {
        self.index.get(doctor_id).map(|&pos| &self.doctors[pos])
    }

    pub fn by_type(&self, doctor_type: DoctorType) -> impl Iterator<Item = &Doctor> + '_ {
        self.doctors
            .iter()
            .filter(move |d| d.doctor_type == doctor_type)
    }

    pub fn list(&self, doctor_type: Option<DoctorType>) -> Vec<Doctor> {
        match doctor_type {
            Some(t) => self.by_type(t).cloned().collect(),
            None => self.doctors.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.doctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doctors.is_empty()
    }
}
