//! Prompt text sent to `health-chat` from the client side.

/// Symptom check: possible conditions, severity, actions, warning signs.
pub fn symptom_check(symptoms: &str) -> String {
    format!(
        "Based on these symptoms: \"{symptoms}\"\n\n\
         Please provide:\n\
         1. Possible conditions (list 2-3 most likely)\n\
         2. Severity assessment (mild/moderate/severe)\n\
         3. Recommended actions (home care vs. see a doctor)\n\
         4. Warning signs to watch for\n\n\
         Be helpful but emphasize this is not a diagnosis."
    )
}

/// Medicine lookup: indications, dosage, side effects, precautions,
/// interactions.
pub fn medicine_info(medicine: &str) -> String {
    format!(
        "Provide detailed information about the medicine \"{medicine}\". Include:\n\
         1. What it's used for (indications)\n\
         2. Common dosage\n\
         3. Side effects\n\
         4. Precautions and warnings\n\
         5. Drug interactions to be aware of\n\n\
         Keep the response informative but concise."
    )
}

/// Free-form question about the user's reports.
pub fn report_query(query: &str) -> String {
    format!("Context: User has medical reports. Query: {query}")
}

/// Sent instead of a vitals analysis when no readings are available.
pub const GENERAL_GUIDANCE: &str = "Provide general health guidance and tips for maintaining good \
health. Include advice on heart health, respiratory health, and temperature monitoring.";

/// A static emergency number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyContact {
    pub name: &'static str,
    pub number: &'static str,
    pub description: &'static str,
}

pub const EMERGENCY_CONTACTS: [EmergencyContact; 4] = [
    EmergencyContact {
        name: "Emergency Services",
        number: "112",
        description: "Universal emergency number",
    },
    EmergencyContact {
        name: "Police",
        number: "100",
        description: "Police emergency helpline",
    },
    EmergencyContact {
        name: "Ambulance",
        number: "108",
        description: "Medical emergency services",
    },
    EmergencyContact {
        name: "Fire Brigade",
        number: "101",
        description: "Fire emergency services",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_embed_user_input() {
        assert!(symptom_check("headache and fever").contains("\"headache and fever\""));
        assert!(medicine_info("Paracetamol").contains("\"Paracetamol\""));
        assert_eq!(
            report_query("is my cholesterol ok?"),
            "Context: User has medical reports. Query: is my cholesterol ok?"
        );
    }

    #[test]
    fn emergency_numbers() {
        let numbers: Vec<&str> = EMERGENCY_CONTACTS.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec!["112", "100", "108", "101"]);
    }
}
