//! crates/quest_core/src/achievements/conditions.rs
//!
//! The ten unlock predicates. Each one is a read-only query against the store;
//! "today" is the local day of the engine's calendar.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};

use crate::calendar::Calendar;
use crate::domain::{AchievementId, UserId};
use crate::ports::{PortResult, ProgressStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    FirstCompletion,
    ThreeDayStreak,
    ThirtyDayStreak,
    HundredCompletions,
    NightOwl,
    TwentyInADay,
    MorningAndAfternoon,
    MondayThree,
    ThirtyInADay,
    PlannedButIdle,
}

impl Condition {
    pub const ALL: [Condition; 10] = [
        Condition::FirstCompletion,
        Condition::ThreeDayStreak,
        Condition::ThirtyDayStreak,
        Condition::HundredCompletions,
        Condition::NightOwl,
        Condition::TwentyInADay,
        Condition::MorningAndAfternoon,
        Condition::MondayThree,
        Condition::ThirtyInADay,
        Condition::PlannedButIdle,
    ];

    pub fn from_id(id: AchievementId) -> Option<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn id(&self) -> AchievementId {
        match self {
            Condition::FirstCompletion => 1,
            Condition::ThreeDayStreak => 2,
            Condition::ThirtyDayStreak => 3,
            Condition::HundredCompletions => 4,
            Condition::NightOwl => 5,
            Condition::TwentyInADay => 6,
            Condition::MorningAndAfternoon => 7,
            Condition::MondayThree => 8,
            Condition::ThirtyInADay => 9,
            Condition::PlannedButIdle => 10,
        }
    }

    pub async fn is_met(
        &self,
        store: &dyn ProgressStore,
        calendar: &Calendar,
        now: DateTime<Utc>,
        user_id: UserId,
    ) -> PortResult<bool> {
        let (day_start, day_end) = calendar.day_bounds(now);
        match self {
            Condition::FirstCompletion => Ok(store.count_completed(user_id).await? >= 1),
            Condition::ThreeDayStreak => Ok(current_streak(store, user_id).await? >= 3),
            Condition::ThirtyDayStreak => Ok(current_streak(store, user_id).await? >= 30),
            Condition::HundredCompletions => Ok(store.count_completed(user_id).await? >= 100),
            Condition::NightOwl => {
                let dawn = day_start + Duration::hours(5);
                Ok(store.count_completed_between(user_id, day_start, dawn).await? >= 1)
            }
            Condition::TwentyInADay => {
                Ok(store.count_completed_between(user_id, day_start, day_end).await? >= 20)
            }
            Condition::MorningAndAfternoon => {
                let noon = day_start + Duration::hours(12);
                let morning = store.count_completed_between(user_id, day_start, noon).await?;
                if morning == 0 {
                    return Ok(false);
                }
                Ok(store.count_completed_between(user_id, noon, day_end).await? >= 1)
            }
            Condition::MondayThree => {
                if calendar.local_date(now).weekday() != Weekday::Mon {
                    return Ok(false);
                }
                Ok(store.count_completed_between(user_id, day_start, day_end).await? >= 3)
            }
            Condition::ThirtyInADay => {
                Ok(store.count_completed_between(user_id, day_start, day_end).await? >= 30)
            }
            Condition::PlannedButIdle => {
                let created = store
                    .list_tasks_created_between(user_id, day_start, day_end)
                    .await?;
                Ok(created.len() >= 3 && created.iter().all(|t| !t.completed))
            }
        }
    }
}

async fn current_streak(store: &dyn ProgressStore, user_id: UserId) -> PortResult<i32> {
    Ok(store
        .get_profile(user_id)
        .await?
        .map(|p| p.current_streak)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Profile, Task};
    use crate::memory::MemoryStore;

    // 2024-05-20 is a Monday.
    fn monday_noon() -> DateTime<Utc> {
        "2024-05-20T12:30:00Z".parse().unwrap()
    }

    fn task(user_id: UserId, completed_at: Option<DateTime<Utc>>, created_at: DateTime<Utc>) -> Task {
        Task {
            task_id: 0,
            user_id,
            content: "t".to_string(),
            completed: completed_at.is_some(),
            completed_at,
            due_at: created_at,
            created_at,
            exp_given: completed_at.is_some(),
            exp_reward: 100,
        }
    }

    async fn met(store: &MemoryStore, condition: Condition, user_id: UserId, now: DateTime<Utc>) -> bool {
        condition
            .is_met(store, &Calendar::utc(), now, user_id)
            .await
            .unwrap()
    }

    #[test]
    fn ids_round_trip() {
        for condition in Condition::ALL {
            assert_eq!(Condition::from_id(condition.id()), Some(condition));
        }
        assert_eq!(Condition::from_id(0), None);
        assert_eq!(Condition::from_id(11), None);
    }

    #[tokio::test]
    async fn first_completion_needs_one_completed_task() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        assert!(!met(&store, Condition::FirstCompletion, user.user_id, monday_noon()).await);

        store.put_task(task(user.user_id, Some(monday_noon()), monday_noon())).await;
        assert!(met(&store, Condition::FirstCompletion, user.user_id, monday_noon()).await);
    }

    #[tokio::test]
    async fn streak_conditions_read_the_profile() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        let mut tx = store.begin().await.unwrap();
        tx.save_streak(&Profile {
            user_id: user.user_id,
            current_streak: 3,
            longest_streak: 3,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(met(&store, Condition::ThreeDayStreak, user.user_id, monday_noon()).await);
        assert!(!met(&store, Condition::ThirtyDayStreak, user.user_id, monday_noon()).await);
    }

    #[tokio::test]
    async fn night_owl_only_counts_early_hours_of_today() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        let late_yesterday: DateTime<Utc> = "2024-05-19T03:00:00Z".parse().unwrap();
        store.put_task(task(user.user_id, Some(late_yesterday), late_yesterday)).await;
        assert!(!met(&store, Condition::NightOwl, user.user_id, monday_noon()).await);

        let early_today: DateTime<Utc> = "2024-05-20T04:59:00Z".parse().unwrap();
        store.put_task(task(user.user_id, Some(early_today), early_today)).await;
        assert!(met(&store, Condition::NightOwl, user.user_id, monday_noon()).await);
    }

    #[tokio::test]
    async fn morning_and_afternoon_need_both_halves() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        let morning: DateTime<Utc> = "2024-05-20T08:00:00Z".parse().unwrap();
        store.put_task(task(user.user_id, Some(morning), morning)).await;
        assert!(!met(&store, Condition::MorningAndAfternoon, user.user_id, monday_noon()).await);

        store.put_task(task(user.user_id, Some(monday_noon()), monday_noon())).await;
        assert!(met(&store, Condition::MorningAndAfternoon, user.user_id, monday_noon()).await);
    }

    #[tokio::test]
    async fn monday_condition_requires_monday() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        for minutes in 0..3 {
            let at = monday_noon() + Duration::minutes(minutes);
            store.put_task(task(user.user_id, Some(at), at)).await;
        }
        let later = monday_noon() + Duration::hours(1);
        assert!(met(&store, Condition::MondayThree, user.user_id, later).await);
        assert!(!met(&store, Condition::MondayThree, user.user_id, later + Duration::days(1)).await);
    }

    #[tokio::test]
    async fn daily_volume_thresholds() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        for minutes in 0..20 {
            let at = monday_noon() - Duration::minutes(minutes);
            store.put_task(task(user.user_id, Some(at), at)).await;
        }
        assert!(met(&store, Condition::TwentyInADay, user.user_id, monday_noon()).await);
        assert!(!met(&store, Condition::ThirtyInADay, user.user_id, monday_noon()).await);
    }

    #[tokio::test]
    async fn planned_but_idle_needs_three_open_tasks_created_today() {
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        for _ in 0..3 {
            store.put_task(task(user.user_id, None, monday_noon())).await;
        }
        assert!(met(&store, Condition::PlannedButIdle, user.user_id, monday_noon()).await);

        store.put_task(task(user.user_id, Some(monday_noon()), monday_noon())).await;
        assert!(!met(&store, Condition::PlannedButIdle, user.user_id, monday_noon()).await);
    }
}
