//! Translation of scope options into driver transaction options.

use mongodb::options::{
    Acknowledgment as DriverAcknowledgment, ReadConcern, ReadPreference as DriverReadPreference,
    SelectionCriteria, TransactionOptions as DriverTransactionOptions,
    WriteConcern as DriverWriteConcern,
};

use atomicdoc_common::{
    Acknowledgment, ReadConcernLevel, ReadPreference, TransactionOptions, WriteConcern,
};

/// Build driver transaction options. Unset fields stay unset so the
/// client and server defaults apply.
pub fn transaction_options(options: &TransactionOptions) -> DriverTransactionOptions {
    let mut driver = DriverTransactionOptions::default();
    driver.read_concern = options.read_concern.map(read_concern);
    driver.write_concern = options.write_concern.as_ref().map(write_concern);
    driver.selection_criteria = options
        .read_preference
        .map(|preference| SelectionCriteria::ReadPreference(read_preference(preference)));
    driver.max_commit_time = options.max_commit_time;
    driver
}

fn read_concern(level: ReadConcernLevel) -> ReadConcern {
    match level {
        ReadConcernLevel::Local => ReadConcern::local(),
        ReadConcernLevel::Majority => ReadConcern::majority(),
        ReadConcernLevel::Snapshot => ReadConcern::snapshot(),
        ReadConcernLevel::Available => ReadConcern::available(),
        ReadConcernLevel::Linearizable => ReadConcern::linearizable(),
    }
}

fn write_concern(concern: &WriteConcern) -> DriverWriteConcern {
    let mut driver = DriverWriteConcern::default();
    driver.w = concern.w.as_ref().map(|w| match w {
        Acknowledgment::Nodes(n) => DriverAcknowledgment::Nodes(*n),
        Acknowledgment::Majority => DriverAcknowledgment::Majority,
        Acknowledgment::Custom(tag) => DriverAcknowledgment::Custom(tag.clone()),
    });
    driver.journal = concern.journal;
    driver.w_timeout = concern.w_timeout;
    driver
}

fn read_preference(preference: ReadPreference) -> DriverReadPreference {
    match preference {
        ReadPreference::Primary => DriverReadPreference::Primary,
        ReadPreference::PrimaryPreferred => {
            DriverReadPreference::PrimaryPreferred { options: None }
        }
        ReadPreference::Secondary => DriverReadPreference::Secondary { options: None },
        ReadPreference::SecondaryPreferred => {
            DriverReadPreference::SecondaryPreferred { options: None }
        }
        ReadPreference::Nearest => DriverReadPreference::Nearest { options: None },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults_stay_unset() {
        let driver = transaction_options(&TransactionOptions::default());
        assert!(driver.read_concern.is_none());
        assert!(driver.write_concern.is_none());
        assert!(driver.selection_criteria.is_none());
        assert!(driver.max_commit_time.is_none());
    }

    #[test]
    fn test_primary_local_majority() {
        let driver = transaction_options(&TransactionOptions::primary_local_majority());
        assert_eq!(
            driver.read_concern.map(|concern| concern.level),
            Some(ReadConcern::local().level)
        );
        assert_eq!(
            driver.write_concern.and_then(|w| w.w),
            Some(DriverAcknowledgment::Majority)
        );
        assert!(matches!(
            driver.selection_criteria,
            Some(SelectionCriteria::ReadPreference(DriverReadPreference::Primary))
        ));
    }

    #[test]
    fn test_write_concern_fields() {
        let options = TransactionOptions::default()
            .with_write_concern(WriteConcern {
                w: Some(Acknowledgment::Nodes(2)),
                journal: Some(true),
                w_timeout: Some(Duration::from_millis(500)),
            })
            .with_max_commit_time(Duration::from_secs(2));
        let driver = transaction_options(&options);

        let concern = driver.write_concern.unwrap();
        assert_eq!(concern.w, Some(DriverAcknowledgment::Nodes(2)));
        assert_eq!(concern.journal, Some(true));
        assert_eq!(concern.w_timeout, Some(Duration::from_millis(500)));
        assert_eq!(driver.max_commit_time, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_secondary_preferences() {
        assert!(matches!(
            read_preference(ReadPreference::Nearest),
            DriverReadPreference::Nearest { options: None }
        ));
        assert!(matches!(
            read_preference(ReadPreference::SecondaryPreferred),
            DriverReadPreference::SecondaryPreferred { options: None }
        ));
    }
}
