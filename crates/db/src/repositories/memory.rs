use std::sync::Arc;

use tokio::sync::RwLock;

use tempra_core::errors::ProviderError;
use tempra_core::providers::{GoalPlan, NewTodo, PlanStore, TodoItem, TodoQuery, TodoStore};

/// Process-local todo list. Clones share the same items.
#[derive(Clone, Default)]
pub struct InMemoryTodoStore {
    items: Arc<RwLock<Vec<TodoItem>>>,
}

#[async_trait::async_trait]
impl TodoStore for InMemoryTodoStore {
    async fn append(&self, todo: NewTodo) -> Result<TodoItem, ProviderError> {
        let item = TodoItem::from_new(todo);
        self.items.write().await.push(item.clone());
        Ok(item)
    }

    async fn query(&self, user_id: &str, query: TodoQuery) -> Result<Vec<TodoItem>, ProviderError> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|item| item.user_id == user_id)
            .filter(|item| query.include_completed || !item.completed)
            .filter(|item| query.kind.map_or(true, |kind| item.kind == kind))
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPlanStore {
    plans: Arc<RwLock<Vec<GoalPlan>>>,
}

#[async_trait::async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn save_plan(&self, plan: GoalPlan) -> Result<(), ProviderError> {
        let mut plans = self.plans.write().await;
        match plans.iter_mut().find(|existing| existing.id == plan.id) {
            Some(existing) => *existing = plan,
            None => plans.push(plan),
        }
        Ok(())
    }

    async fn list_plans(&self, user_id: &str) -> Result<Vec<GoalPlan>, ProviderError> {
        let plans = self.plans.read().await;
        Ok(plans.iter().filter(|plan| plan.user_id == user_id).cloned().collect())
    }
}
