//! User-facing texts (Russian, as shipped to the channel audience).

pub const WELCOME: &str = "👋 Привет! Добро пожаловать в наш бот! 🎉\n\n\
Здесь вы можете:\n\
💳 Оформить кредит\n\
💰 Получить займ\n\
🛡️ Оформить страховку\n\
💼 Найти работу\n\
🤖 Задать вопрос нейросети\n\n\
Выберите действие ниже:";

pub const SUBSCRIBE_REQUIRED: &str = "📢 Для доступа к нейросети подпишитесь на канал!";

pub const ASK_PROMPT: &str = "✍️ Введите ваш вопрос для нейросети:";

pub const AI_UNAVAILABLE: &str = "😔 Нейросеть сейчас недоступна. Попробуйте позже.";

pub const GATE_UNAVAILABLE: &str = "⚠️ Не удалось проверить подписку. Попробуйте позже.";

pub const NOT_SUBSCRIBED_ALERT: &str = "❌ Вы ещё не подписались!";

pub const UNKNOWN_INPUT: &str = "🤔 Я вас не понял. Откройте меню: /menu";

pub const ADMIN_ONLY: &str = "⛔ Эта команда доступна только администраторам.";

pub const ERROR: &str = "⚠️ Произошла ошибка. Попробуйте позже.";

pub const BTN_SUBSCRIBE: &str = "📢 Подписаться на канал";

pub const BTN_CONFIRM_SUBSCRIPTION: &str = "✅ Я подписался";

pub fn quota_exceeded(max: u32) -> String {
    format!("🚫 Лимит бесплатных вопросов исчерпан ({max} из {max}).")
}

pub fn stats(total: u64, subscribed: u64) -> String {
    format!("📊 Статистика\n\n👥 Пользователей: {total}\n✅ Подписано: {subscribed}")
}

pub fn reload_ok(screens: usize) -> String {
    format!("🔄 Меню перезагружено ({screens} экранов).")
}

pub fn reload_failed(err: &str) -> String {
    format!("🚫 Перезагрузка меню не удалась:\n{err}")
}

pub fn admin_error(err: &str) -> String {
    format!("🚫 Ошибка: {err}")
}
